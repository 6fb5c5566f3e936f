// src/events.rs

//! Tag event feed
//!
//! The message bus is consumed as newline-delimited JSON envelopes:
//!
//! ```json
//! {"topic": "org.fedoraproject.prod.buildsys.tag", "msg_id": "2015-...",
//!  "msg": {"tag": "f22", "build_id": 631459, "instance": "primary"}}
//! ```
//!
//! Lines are read on a separate thread and handed over a `flume` channel, so
//! the dispatcher can wait for the next event with a deadline.

use crate::config::{Config, TagRule, key_for_tag};
use crate::error::{Error, Result};
use crate::signing::{BuildId, PRIMARY_INSTANCE, SigningTask, key_for_instance};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::BufRead;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One bus message envelope
#[derive(Debug, Clone, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    #[serde(default)]
    pub msg_id: Option<String>,
    #[serde(default)]
    pub msg: serde_json::Value,
}

impl BusMessage {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line)
            .map_err(|e| Error::ParseError(format!("Invalid bus message: {}", e)))
    }
}

/// Body of a `buildsys.tag` message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagEvent {
    pub tag: String,
    pub build_id: BuildId,
    #[serde(default = "default_instance")]
    pub instance: String,
}

fn default_instance() -> String {
    PRIMARY_INSTANCE.to_string()
}

/// Turns bus messages into signing tasks
#[derive(Debug, Clone)]
pub struct EventFilter {
    topic: String,
    rules: Vec<TagRule>,
}

impl EventFilter {
    pub fn new(topic: impl Into<String>, rules: Vec<TagRule>) -> Self {
        Self {
            topic: topic.into(),
            rules,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.tag_topic(), config.tags.clone())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Task for `message`, or `None` when it is not a watched tag event
    ///
    /// A tag topic with an unusable body is an error; everything else that
    /// does not match is silently skipped.
    pub fn extract(&self, message: &BusMessage, now: DateTime<Utc>) -> Result<Option<SigningTask>> {
        if message.topic != self.topic {
            debug!("Ignoring message on {}", message.topic);
            return Ok(None);
        }

        let event: TagEvent = serde_json::from_value(message.msg.clone())
            .map_err(|e| Error::ParseError(format!("Invalid tag event: {}", e)))?;

        let Some(base_key) = key_for_tag(&self.rules, &event.tag) else {
            debug!("Ignoring build {} tagged into {}", event.build_id, event.tag);
            return Ok(None);
        };

        let key = key_for_instance(base_key, &event.instance);
        info!(
            "Got build {} tagged into {} on {}, signing with {}",
            event.build_id, event.tag, event.instance, key
        );

        let mut task = SigningTask::new(event.build_id, event.instance, key, now);
        if let Some(ref id) = message.msg_id {
            task = task.with_source_event(id.clone());
        }
        Ok(Some(task))
    }

    /// Parse a raw feed line and extract a task from it
    pub fn extract_line(&self, line: &str, now: DateTime<Utc>) -> Result<Option<SigningTask>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        self.extract(&BusMessage::parse(line)?, now)
    }
}

/// What the next read from the feed produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    Line(String),
    /// Nothing arrived before the deadline
    Idle,
    /// The feed reached its end
    Closed,
}

/// Feed lines read on a background thread
pub struct LineFeed {
    receiver: flume::Receiver<String>,
    reader: Option<JoinHandle<()>>,
}

impl LineFeed {
    /// Start reading `source` line by line
    pub fn spawn<R>(source: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (sender, receiver) = flume::unbounded();

        let reader = thread::spawn(move || {
            for line in source.lines() {
                match line {
                    Ok(line) => {
                        if sender.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Event feed read failed: {}", e);
                        break;
                    }
                }
            }
            debug!("Event feed reader finished");
        });

        Self {
            receiver,
            reader: Some(reader),
        }
    }

    /// Wait up to `timeout` for the next line
    pub fn next(&self, timeout: Duration) -> FeedItem {
        match self.receiver.recv_timeout(timeout) {
            Ok(line) => FeedItem::Line(line),
            Err(flume::RecvTimeoutError::Timeout) => FeedItem::Idle,
            Err(flume::RecvTimeoutError::Disconnected) => FeedItem::Closed,
        }
    }
}

impl Drop for LineFeed {
    fn drop(&mut self) {
        // A reader blocked on stdin cannot be interrupted; only join a finished one
        if let Some(handle) = self.reader.take()
            && handle.is_finished()
        {
            let _ = handle.join();
        }
    }
}

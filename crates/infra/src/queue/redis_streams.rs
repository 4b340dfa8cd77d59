//! Redis Streams-backed retry queue (optional).
//!
//! - **Send**: `XADD` with the body in a `body` field
//! - **Receive**: `XAUTOCLAIM` entries idle past the visibility timeout, then
//!   `XREADGROUP` for new ones
//! - **Delete**: `XACK` + `XDEL`; the receipt handle is the stream entry id
//! - **Retention**: `XTRIM MINID` before each receive
//!
//! One consumer group serves every drain; entries a consumer has read but
//! not deleted stay pending and are reclaimed once idle long enough.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use uploader_core::{Clock, DeleteOutcome, MessageId};

use super::r#trait::{QueueError, ReceivedMessage, RetryQueue, validate_body};
use crate::config::QueueConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_GROUP: &str = "uploader.retry";

#[derive(Debug, thiserror::Error)]
pub enum RedisQueueError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("malformed stream reply: {0}")]
    Malformed(String),
}

impl From<RedisQueueError> for QueueError {
    fn from(err: RedisQueueError) -> Self {
        QueueError::Backend(err.to_string())
    }
}

#[derive(Debug)]
pub struct RedisStreamsRetryQueue {
    client: redis::Client,
    url: String,
    stream_key: String,
    group: String,
    consumer: String,
    visibility_timeout: Duration,
    retention: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl RedisStreamsRetryQueue {
    /// Connect and make sure the consumer group exists.
    pub fn connect(
        redis_url: impl AsRef<str>,
        config: &QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RedisQueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisQueueError::Connection(e.to_string()))?;

        let stream_key = format!("uploader:{}", config.name);
        let queue = Self {
            client,
            url: format!("redis-stream://{stream_key}"),
            stream_key,
            group: DEFAULT_GROUP.to_string(),
            consumer: format!("consumer-{}", uuid::Uuid::now_v7()),
            visibility_timeout: Duration::from_secs(config.visibility_timeout_secs),
            retention: config.retention(),
            clock,
        };
        queue.ensure_group()?;
        Ok(queue)
    }

    fn connection(&self, read_timeout: Duration) -> Result<redis::Connection, RedisQueueError> {
        let conn = self
            .client
            .get_connection_with_timeout(CONNECT_TIMEOUT)
            .map_err(|e| RedisQueueError::Connection(e.to_string()))?;
        conn.set_read_timeout(Some(read_timeout))
            .map_err(|e| RedisQueueError::Connection(e.to_string()))?;
        Ok(conn)
    }

    /// `XGROUP CREATE ... MKSTREAM`; an existing group is fine.
    fn ensure_group(&self) -> Result<(), RedisQueueError> {
        let mut conn = self.connection(RESPONSE_TIMEOUT)?;
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisQueueError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    #[instrument(skip(self, body), fields(stream_key = %self.stream_key), err)]
    fn add(&self, body: &str) -> Result<String, RedisQueueError> {
        let mut conn = self.connection(RESPONSE_TIMEOUT)?;
        redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg("body")
            .arg(body)
            .query(&mut conn)
            .map_err(|e| RedisQueueError::Command(format!("XADD failed: {e}")))
    }

    fn trim_expired(&self, conn: &mut redis::Connection) -> Result<(), RedisQueueError> {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(self.retention)
            .map_or(0, |cutoff| cutoff.timestamp_millis().max(0));
        let trimmed: u64 = redis::cmd("XTRIM")
            .arg(&self.stream_key)
            .arg("MINID")
            .arg(format!("{cutoff}-0"))
            .query(conn)
            .map_err(|e| RedisQueueError::Command(format!("XTRIM failed: {e}")))?;
        if trimmed > 0 {
            debug!(stream_key = %self.stream_key, trimmed, "trimmed expired entries");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(stream_key = %self.stream_key), err)]
    fn read(&self, max_messages: usize, wait: Duration) -> Result<Vec<ReceivedMessage>, RedisQueueError> {
        let mut conn = self.connection(wait + RESPONSE_TIMEOUT)?;
        self.trim_expired(&mut conn)?;

        let reclaimed: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.visibility_timeout.as_millis().to_string())
            .arg("0-0")
            .arg("COUNT")
            .arg(max_messages)
            .query(&mut conn)
            .map_err(|e| RedisQueueError::Command(format!("XAUTOCLAIM failed: {e}")))?;

        let mut messages = parse_autoclaim(reclaimed)?;
        if !messages.is_empty() {
            return Ok(messages);
        }

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(max_messages);
        // BLOCK 0 means forever, so a zero wait omits BLOCK entirely.
        if !wait.is_zero() {
            cmd.arg("BLOCK").arg(wait.as_millis().to_string());
        }
        let fresh: redis::Value = cmd
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query(&mut conn)
            .map_err(|e| RedisQueueError::Command(format!("XREADGROUP failed: {e}")))?;

        messages.extend(parse_read_group(fresh)?);
        Ok(messages)
    }

    #[instrument(skip(self), fields(stream_key = %self.stream_key), err)]
    fn remove(&self, entry_id: &str) -> Result<DeleteOutcome, RedisQueueError> {
        let mut conn = self.connection(RESPONSE_TIMEOUT)?;
        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(entry_id)
            .query(&mut conn)
            .map_err(|e| RedisQueueError::Command(format!("XACK failed: {e}")))?;
        let deleted: u64 = redis::cmd("XDEL")
            .arg(&self.stream_key)
            .arg(entry_id)
            .query(&mut conn)
            .map_err(|e| RedisQueueError::Command(format!("XDEL failed: {e}")))?;

        Ok(if deleted > 0 {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::AlreadyGone
        })
    }
}

impl RetryQueue for RedisStreamsRetryQueue {
    fn queue_url(&self) -> &str {
        &self.url
    }

    fn send(&self, body: &str) -> Result<MessageId, QueueError> {
        validate_body(body)?;
        let entry_id = self.add(body)?;
        MessageId::new(entry_id).map_err(|e| QueueError::Backend(e.to_string()))
    }

    fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<ReceivedMessage>, QueueError> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }
        Ok(self.read(max_messages, wait)?)
    }

    fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<DeleteOutcome, QueueError> {
        if queue_url != self.url {
            return Err(QueueError::UnknownQueue(queue_url.to_string()));
        }
        Ok(self.remove(receipt_handle)?)
    }
}

fn data(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

/// `[id, [field, value, ...]]` → message. `Nil` entries (deleted while pending) yield `None`.
fn parse_entry(entry: &redis::Value) -> Result<Option<ReceivedMessage>, RedisQueueError> {
    let parts = match entry {
        redis::Value::Nil => return Ok(None),
        redis::Value::Bulk(parts) if parts.len() >= 2 => parts,
        other => return Err(RedisQueueError::Malformed(format!("entry: {other:?}"))),
    };

    let id = data(&parts[0]).ok_or_else(|| RedisQueueError::Malformed("entry id".to_string()))?;
    let fields = match &parts[1] {
        redis::Value::Bulk(fields) => fields,
        // An entry removed by XDEL can be claimed with no fields.
        redis::Value::Nil => return Ok(None),
        other => return Err(RedisQueueError::Malformed(format!("entry fields: {other:?}"))),
    };

    let body = fields
        .chunks(2)
        .find_map(|pair| match pair {
            [key, value] if data(key).as_deref() == Some("body") => data(value),
            _ => None,
        })
        .ok_or_else(|| RedisQueueError::Malformed(format!("entry {id} has no body field")))?;

    let message_id = MessageId::new(id.clone()).map_err(|e| RedisQueueError::Malformed(e.to_string()))?;
    Ok(Some(ReceivedMessage {
        message_id,
        body,
        receipt_handle: id,
    }))
}

fn parse_entries(entries: &[redis::Value]) -> Result<Vec<ReceivedMessage>, RedisQueueError> {
    let mut messages = Vec::with_capacity(entries.len());
    for entry in entries {
        match parse_entry(entry) {
            Ok(Some(message)) => messages.push(message),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "skipping unreadable stream entry"),
        }
    }
    Ok(messages)
}

/// `XAUTOCLAIM` reply: `[next_cursor, [entries...], (deleted ids...)]`.
fn parse_autoclaim(reply: redis::Value) -> Result<Vec<ReceivedMessage>, RedisQueueError> {
    match reply {
        redis::Value::Bulk(parts) => match parts.get(1) {
            Some(redis::Value::Bulk(entries)) => parse_entries(entries),
            Some(redis::Value::Nil) | None => Ok(Vec::new()),
            Some(other) => Err(RedisQueueError::Malformed(format!("XAUTOCLAIM entries: {other:?}"))),
        },
        redis::Value::Nil => Ok(Vec::new()),
        other => Err(RedisQueueError::Malformed(format!("XAUTOCLAIM reply: {other:?}"))),
    }
}

/// `XREADGROUP` reply: `[[stream_key, [entries...]]]`, or `Nil` on timeout.
fn parse_read_group(reply: redis::Value) -> Result<Vec<ReceivedMessage>, RedisQueueError> {
    let streams = match reply {
        redis::Value::Nil => return Ok(Vec::new()),
        redis::Value::Bulk(streams) => streams,
        other => return Err(RedisQueueError::Malformed(format!("XREADGROUP reply: {other:?}"))),
    };

    let mut messages = Vec::new();
    for stream in &streams {
        match stream {
            redis::Value::Bulk(parts) => match parts.get(1) {
                Some(redis::Value::Bulk(entries)) => messages.extend(parse_entries(entries)?),
                _ => return Err(RedisQueueError::Malformed("XREADGROUP stream".to_string())),
            },
            other => return Err(RedisQueueError::Malformed(format!("XREADGROUP stream: {other:?}"))),
        }
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Value;

    fn bytes(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    fn entry(id: &str, body: &str) -> Value {
        Value::Bulk(vec![bytes(id), Value::Bulk(vec![bytes("body"), bytes(body)])])
    }

    #[test]
    fn read_group_reply_is_parsed() {
        let reply = Value::Bulk(vec![Value::Bulk(vec![
            bytes("uploader:retry-queue"),
            Value::Bulk(vec![entry("1-0", "{\"a\":1}"), entry("2-0", "{\"b\":2}")]),
        ])]);

        let messages = parse_read_group(reply).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].receipt_handle, "1-0");
        assert_eq!(messages[1].body, "{\"b\":2}");
    }

    #[test]
    fn read_group_timeout_is_empty() {
        assert!(parse_read_group(Value::Nil).unwrap().is_empty());
    }

    #[test]
    fn autoclaim_skips_deleted_entries() {
        let reply = Value::Bulk(vec![
            bytes("0-0"),
            Value::Bulk(vec![entry("5-0", "x"), Value::Nil]),
            Value::Bulk(vec![]),
        ]);
        let messages = parse_autoclaim(reply).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id.as_str(), "5-0");
    }

    #[test]
    fn entries_without_body_are_skipped() {
        let bad = Value::Bulk(vec![bytes("3-0"), Value::Bulk(vec![bytes("other"), bytes("v")])]);
        assert!(parse_entry(&bad).is_err());
        assert!(parse_entries(&[bad]).unwrap().is_empty());
    }
}

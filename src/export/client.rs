use crate::config::Config;
use crate::export::sender::{BackoffPolicy, MultiSender, RetrySender, Sender, TcpSender};
use crate::export::{EventTime, ExportError, IngestClient};
use crate::Value;
use std::collections::BTreeMap;

/// Ingestion client speaking a line-delimited forward protocol.
///
/// Each record is encoded as one JSON line, `[tag, [seconds, nanos],
/// record]`, and written through the sender chain. Reliability comes from
/// the chain itself: retry with backoff around endpoint failover.
#[derive(Debug)]
pub struct ForwardClient {
    sender: Box<dyn Sender>,
}

impl ForwardClient {
    /// Wrap an arbitrary sender.
    pub fn new(sender: Box<dyn Sender>) -> Self {
        ForwardClient { sender }
    }

    /// Build the default chain for a configuration: one lazy TCP sender per
    /// endpoint, failover across them when there is more than one, retry
    /// with exponential backoff around the whole thing.
    pub fn for_config(config: &Config) -> Self {
        let mut senders: Vec<Box<dyn Sender>> = config
            .endpoints()
            .iter()
            .map(|endpoint| Box::new(TcpSender::new(endpoint.clone())) as Box<dyn Sender>)
            .collect();

        let base: Box<dyn Sender> = if senders.len() == 1 {
            senders.remove(0)
        } else {
            Box::new(MultiSender::new(senders))
        };

        ForwardClient::new(Box::new(RetrySender::new(base, BackoffPolicy::default())))
    }
}

impl IngestClient for ForwardClient {
    fn send(
        &self,
        tag: &str,
        time: EventTime,
        record: &BTreeMap<String, Value>,
    ) -> Result<(), ExportError> {
        let mut payload = serde_json::to_vec(&(tag, (time.unix_seconds, time.nanos), record))?;
        payload.push(b'\n');
        self.sender.send(&payload)?;
        Ok(())
    }

    fn close(&self) {
        self.sender.close();
    }
}

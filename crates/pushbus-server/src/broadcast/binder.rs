//! Attaching a new connection to the broadcasters it asked for.

use std::sync::Arc;

use metrics::counter;
use pushbus_core::topic::GLOBAL_TOPIC;
use tracing::debug;

use super::broadcaster::Broadcaster;
use super::connection::{ClientConnection, OutboundFrame, TransportKind};
use super::registry::TopicRegistry;
use super::whitelist::WhitelistIndex;
use crate::errors::{PushError, Result};
use crate::metrics::SUBSCRIBE_REJECTED_TOTAL;

/// When a suspended connection is resumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumePolicy {
    /// Long-poll: complete the response after the first delivered frame.
    AfterFirstBroadcast,
    /// Streaming and WebSocket: stay open until the client leaves.
    StayOpen,
}

/// Result of a successful bind.
#[derive(Debug)]
pub struct Binding {
    /// Broadcaster of the topic addressed by the request path.
    pub primary: Arc<Broadcaster>,
    /// Requested topics the connection was attached to.
    pub attached: Vec<String>,
    /// Requested topics that were neither registered nor whitelisted, plus
    /// the reserved global topic.
    pub skipped: Vec<String>,
    /// How the transport should treat the suspended connection.
    pub resume: ResumePolicy,
    /// Cached frames re-sent because the client supplied a replay cursor.
    pub replayed: usize,
}

/// Resolves requested topics and attaches connections to them.
pub struct SubscriptionBinder {
    registry: Arc<TopicRegistry>,
    whitelist: Arc<WhitelistIndex>,
}

impl SubscriptionBinder {
    /// Create a binder over `registry` and `whitelist`.
    pub fn new(registry: Arc<TopicRegistry>, whitelist: Arc<WhitelistIndex>) -> Self {
        Self {
            registry,
            whitelist,
        }
    }

    /// Attach `conn` to each requested topic, then to the primary topic.
    ///
    /// A requested topic is attached if its broadcaster exists, or created
    /// and attached if it matches the whitelist; otherwise it is skipped.
    /// The reserved global topic is always skipped. If the primary topic has
    /// no broadcaster every attachment made here is undone and
    /// [`PushError::UnresolvedPrimaryTopic`] is returned.
    ///
    /// With `replay_since`, cached frames newer than that stamp are re-sent
    /// to the connection in `seq` order.
    pub fn bind(
        &self,
        conn: &Arc<ClientConnection>,
        primary: Option<&str>,
        requested: &[String],
        replay_since: Option<u64>,
    ) -> Result<Binding> {
        let mut attached: Vec<String> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();

        for topic in requested {
            if attached.contains(topic) {
                continue;
            }
            if topic == GLOBAL_TOPIC {
                skipped.push(topic.clone());
                continue;
            }
            if self.registry.attach(topic, conn, false).is_some() {
                attached.push(topic.clone());
            } else if let Some(entry) = self.whitelist.matches(topic) {
                if self.registry.attach(topic, conn, true).is_some() {
                    debug!(topic = %topic, pattern = %entry.pattern, conn_id = %conn.id, "whitelisted topic created");
                    attached.push(topic.clone());
                }
            } else {
                debug!(topic = %topic, conn_id = %conn.id, "unknown topic skipped");
                skipped.push(topic.clone());
            }
        }

        let Some(primary_broadcaster) = primary.and_then(|t| self.registry.attach(t, conn, false))
        else {
            for topic in &attached {
                let _ = self.registry.detach(topic, conn);
            }
            counter!(SUBSCRIBE_REJECTED_TOTAL, "reason" => "unresolved_primary").increment(1);
            return Err(PushError::UnresolvedPrimaryTopic(
                primary.unwrap_or_default().to_owned(),
            ));
        };

        let replayed = replay_since.map_or(0, |after| {
            self.replay(conn, &primary_broadcaster, &attached, after)
        });

        let resume = if conn.transport == TransportKind::LongPolling {
            ResumePolicy::AfterFirstBroadcast
        } else {
            ResumePolicy::StayOpen
        };

        debug!(
            conn_id = %conn.id,
            primary = %primary_broadcaster.topic(),
            attached = attached.len(),
            skipped = skipped.len(),
            replayed,
            "connection bound"
        );

        Ok(Binding {
            primary: primary_broadcaster,
            attached,
            skipped,
            resume,
            replayed,
        })
    }

    fn replay(
        &self,
        conn: &ClientConnection,
        primary: &Broadcaster,
        attached: &[String],
        after: u64,
    ) -> usize {
        let mut frames: Vec<OutboundFrame> = primary.cached_since(after);
        for topic in attached.iter().filter(|t| *t != primary.topic()) {
            if let Some(b) = self.registry.lookup(topic, false) {
                frames.extend(b.cached_since(after));
            }
        }
        frames.sort_by_key(|f| f.seq);
        frames.dedup_by_key(|f| f.seq);

        frames.into_iter().filter(|f| conn.send(f.clone())).count()
    }
}

//! Broadcast invocation: the operations sent to every member and the replies
//! collected from them.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::membership::MemberId;

/// Mutations a member can be asked to apply to its own store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    ApplyPut {
        key: String,
        #[serde(with = "crate::codec::f64_bits")]
        value: f64,
    },
    ApplyRemove { key: String },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ApplyPut { .. } => "apply_put",
            Operation::ApplyRemove { .. } => "apply_remove",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Operation::ApplyPut { key, .. } | Operation::ApplyRemove { key } => key,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Why a member is suspected instead of having replied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspectReason {
    /// No reply within the broadcast timeout.
    Timeout,
    /// The request could not be delivered, or the member dropped it.
    Unreachable,
}

/// Outcome of a broadcast for one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Received(bool),
    Suspected(SuspectReason),
}

/// How per-member replies are folded into the single result of a write.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum AggregationRule {
    /// Success when at least one member is suspected and every reply
    /// received is `true`. A fully healthy cluster therefore reports failure
    /// for writes every member applied.
    #[default]
    Literal,
    /// Success when no member is suspected and every reply is `true`.
    Strict,
}

/// One reply per member of the view a broadcast was sent to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastResponses {
    replies: Vec<(MemberId, Reply)>,
}

impl BroadcastResponses {
    pub fn new(replies: Vec<(MemberId, Reply)>) -> Self {
        Self { replies }
    }

    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(MemberId, Reply)> {
        self.replies.iter()
    }

    pub fn reply_from(&self, member: &MemberId) -> Option<Reply> {
        self.replies
            .iter()
            .find(|(id, _)| id == member)
            .map(|(_, reply)| *reply)
    }

    pub fn suspected_members(&self) -> Vec<&MemberId> {
        self.replies
            .iter()
            .filter(|(_, reply)| matches!(reply, Reply::Suspected(_)))
            .map(|(member, _)| member)
            .collect()
    }

    /// Values of the replies actually received.
    pub fn results(&self) -> impl Iterator<Item = bool> + '_ {
        self.replies.iter().filter_map(|(_, reply)| match reply {
            Reply::Received(value) => Some(*value),
            Reply::Suspected(_) => None,
        })
    }

    pub fn succeeded(&self, rule: AggregationRule) -> bool {
        let any_suspected = !self.suspected_members().is_empty();
        let all_true = self.results().all(|value| value);
        match rule {
            AggregationRule::Literal => any_suspected && all_true,
            AggregationRule::Strict => !any_suspected && all_true,
        }
    }
}

impl fmt::Display for BroadcastResponses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (member, reply)) in self.replies.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match reply {
                Reply::Received(value) => write!(f, "{member}: {value}")?,
                Reply::Suspected(SuspectReason::Timeout) => write!(f, "{member}: timed out")?,
                Reply::Suspected(SuspectReason::Unreachable) => {
                    write!(f, "{member}: unreachable")?
                }
            }
        }
        f.write_str("]")
    }
}

/// Sends an operation to every current member, the caller included, and
/// waits for each of them to reply or time out.
#[async_trait]
pub trait BroadcastInvoker: Send + Sync {
    async fn invoke(&self, operation: &Operation) -> Result<BroadcastResponses>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responses(replies: &[Reply]) -> BroadcastResponses {
        BroadcastResponses::new(
            replies
                .iter()
                .map(|reply| (MemberId::random(), *reply))
                .collect(),
        )
    }

    const TIMEOUT: Reply = Reply::Suspected(SuspectReason::Timeout);

    #[test]
    fn literal_rule_requires_a_suspected_member() {
        let healthy = responses(&[Reply::Received(true), Reply::Received(true)]);
        assert!(!healthy.succeeded(AggregationRule::Literal));

        let one_down = responses(&[Reply::Received(true), TIMEOUT]);
        assert!(one_down.succeeded(AggregationRule::Literal));

        let refused = responses(&[Reply::Received(false), TIMEOUT]);
        assert!(!refused.succeeded(AggregationRule::Literal));
    }

    #[test]
    fn strict_rule_rejects_any_suspected_member() {
        let healthy = responses(&[Reply::Received(true), Reply::Received(true)]);
        assert!(healthy.succeeded(AggregationRule::Strict));

        let one_down = responses(&[Reply::Received(true), TIMEOUT]);
        assert!(!one_down.succeeded(AggregationRule::Strict));

        let refused = responses(&[Reply::Received(true), Reply::Received(false)]);
        assert!(!refused.succeeded(AggregationRule::Strict));
    }

    #[test]
    fn results_skip_suspected_members() {
        let mixed = responses(&[
            Reply::Received(true),
            Reply::Suspected(SuspectReason::Unreachable),
            Reply::Received(false),
        ]);
        assert_eq!(mixed.results().collect::<Vec<_>>(), vec![true, false]);
        assert_eq!(mixed.suspected_members().len(), 1);
    }

    #[test]
    fn operations_use_tagged_encoding() -> Result<()> {
        let op = Operation::ApplyPut {
            key: "AAPL".into(),
            value: 150.0,
        };
        let encoded = op.encode()?;
        let text = std::str::from_utf8(&encoded).expect("json is utf-8");
        assert!(text.contains(r#""type":"apply_put""#), "{text}");
        assert_eq!(Operation::decode(&encoded)?, op);

        assert!(Operation::decode(br#"{"type":"apply_clear"}"#).is_err());
        Ok(())
    }

    #[test]
    fn non_finite_values_cross_the_wire() -> Result<()> {
        for value in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN, -0.0] {
            let op = Operation::ApplyPut {
                key: "X".into(),
                value,
            };
            match Operation::decode(&op.encode()?)? {
                Operation::ApplyPut { value: decoded, .. } => {
                    assert_eq!(decoded.to_bits(), value.to_bits(), "{value} changed")
                }
                other => panic!("unexpected operation: {other:?}"),
            }
        }
        Ok(())
    }

    #[test]
    fn display_lists_each_member() {
        let member = MemberId::random();
        let single = BroadcastResponses::new(vec![(member.clone(), TIMEOUT)]);
        assert_eq!(single.to_string(), format!("[{member}: timed out]"));
        assert_eq!(single.reply_from(&member), Some(TIMEOUT));
    }
}

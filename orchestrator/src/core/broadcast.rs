//! Time-boxed directives from the planning step to worker agents.

use serde::{Deserialize, Serialize};

const MS_PER_MINUTE: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastStatus {
    Active,
    Expired,
    Superseded,
}

/// A sanitized directive that passed the broadcast norms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Broadcast {
    pub to: String,
    pub message: String,
    pub expires_mins: u32,
}

/// A broadcast as published on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedBroadcast {
    pub id: String,
    pub cycle_id: String,
    #[serde(flatten)]
    pub broadcast: Broadcast,
    pub issued_at: i64,
    pub status: BroadcastStatus,
}

impl IssuedBroadcast {
    pub fn expires_at(&self) -> i64 {
        self.issued_at + i64::from(self.broadcast.expires_mins) * MS_PER_MINUTE
    }

    pub fn is_active_at(&self, now_ms: i64) -> bool {
        self.status == BroadcastStatus::Active && now_ms < self.expires_at()
    }

    /// Whole minutes left before expiry, never negative.
    pub fn minutes_left(&self, now_ms: i64) -> i64 {
        ((self.expires_at() - now_ms) / MS_PER_MINUTE).max(0)
    }
}

/// Issued broadcasts in publication order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BroadcastBoard {
    issued: Vec<IssuedBroadcast>,
}

impl BroadcastBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a cycle's broadcasts, superseding any active broadcast to the same agent.
    pub fn publish(&mut self, cycle_id: &str, broadcasts: &[Broadcast], now_ms: i64) {
        for (index, broadcast) in broadcasts.iter().enumerate() {
            for prior in &mut self.issued {
                if prior.status == BroadcastStatus::Active && prior.broadcast.to == broadcast.to {
                    prior.status = BroadcastStatus::Superseded;
                }
            }
            let id = format!("{}-bc-{}", cycle_id, index + 1);
            self.issued.push(IssuedBroadcast {
                id,
                cycle_id: cycle_id.to_string(),
                broadcast: broadcast.clone(),
                issued_at: now_ms,
                status: BroadcastStatus::Active,
            });
        }
    }

    /// Flip TTL-elapsed broadcasts to `expired`. Returns how many changed.
    pub fn expire(&mut self, now_ms: i64) -> usize {
        let mut expired = 0;
        for issued in &mut self.issued {
            if issued.status == BroadcastStatus::Active && now_ms >= issued.expires_at() {
                issued.status = BroadcastStatus::Expired;
                expired += 1;
            }
        }
        expired
    }

    /// Drop the oldest expired or superseded entries until at most `max`
    /// remain. Active broadcasts are always kept. Returns how many were dropped.
    pub fn prune(&mut self, max: usize) -> usize {
        let excess = self.issued.len().saturating_sub(max);
        let mut dropped = 0;
        self.issued.retain(|issued| {
            if dropped < excess && issued.status != BroadcastStatus::Active {
                dropped += 1;
                return false;
            }
            true
        });
        dropped
    }

    pub fn active(&self, now_ms: i64) -> Vec<&IssuedBroadcast> {
        self.issued
            .iter()
            .filter(|issued| issued.is_active_at(now_ms))
            .collect()
    }

    pub fn all(&self) -> &[IssuedBroadcast] {
        &self.issued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcast(to: &str, mins: u32) -> Broadcast {
        Broadcast {
            to: to.to_string(),
            message: format!("work on {to}"),
            expires_mins: mins,
        }
    }

    #[test]
    fn newer_broadcast_supersedes_older_for_same_agent() {
        let mut board = BroadcastBoard::new();
        board.publish("c1", &[broadcast("swe", 30), broadcast("pm", 30)], 0);
        board.publish("c2", &[broadcast("swe", 30)], 1_000);

        let statuses: Vec<(&str, BroadcastStatus)> = board
            .all()
            .iter()
            .map(|b| (b.broadcast.to.as_str(), b.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("swe", BroadcastStatus::Superseded),
                ("pm", BroadcastStatus::Active),
                ("swe", BroadcastStatus::Active),
            ]
        );
    }

    #[test]
    fn prune_drops_oldest_inactive_entries_only() {
        let mut board = BroadcastBoard::new();
        board.publish("c1", &[broadcast("swe", 30), broadcast("pm", 5)], 0);
        board.publish("c2", &[broadcast("swe", 30)], 1_000);
        board.publish("c3", &[broadcast("swe", 30)], 2_000);
        board.expire(10 * MS_PER_MINUTE);

        assert_eq!(board.prune(10), 0);
        assert_eq!(board.prune(2), 2);
        let left: Vec<&str> = board.all().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(left, vec!["c2-bc-1", "c3-bc-1"]);

        // Active entries survive even when the cap is lower.
        assert_eq!(board.prune(0), 1);
        assert_eq!(board.all().len(), 1);
        assert_eq!(board.all()[0].status, BroadcastStatus::Active);
    }

    #[test]
    fn expire_flips_elapsed_broadcasts() {
        let mut board = BroadcastBoard::new();
        board.publish("c1", &[broadcast("swe", 5), broadcast("pm", 60)], 0);

        let later = 10 * MS_PER_MINUTE;
        assert_eq!(board.active(later).len(), 1);
        assert_eq!(board.expire(later), 1);
        assert_eq!(board.all()[0].status, BroadcastStatus::Expired);
        assert_eq!(board.active(later)[0].minutes_left(later), 50);
    }
}

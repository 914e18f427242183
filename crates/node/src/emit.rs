//! Final chain emission

use crate::config::OutputFormat;
use chrono::{DateTime, Utc};
use peerchain_consensus::{BlockRecord, NodeId, StatsSnapshot};
use serde::Serialize;

/// Everything a node reports once it stops
#[derive(Debug, Serialize)]
pub struct ChainReport {
    pub node_id: NodeId,
    pub total_nodes: u32,
    pub dataset: String,
    pub finished_at: DateTime<Utc>,
    pub blocks: Vec<BlockRecord>,
    pub stats: StatsSnapshot,
}

impl ChainReport {
    pub fn render(&self, format: OutputFormat) -> anyhow::Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Text => Ok(self.render_text()),
        }
    }

    fn render_text(&self) -> String {
        let mut out = format!(
            "node {}/{} dataset {} finished at {} with {} blocks\n",
            self.node_id,
            self.total_nodes,
            self.dataset,
            self.finished_at.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            self.blocks.len()
        );
        for record in &self.blocks {
            out.push_str(&format!(
                "#{:<4} producer {:<3} hash {} prev {} {}\n",
                record.iteration,
                record.producer,
                short(&record.hash),
                short(&record.prev_hash),
                record.payload
            ));
        }
        out
    }
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report() -> ChainReport {
        ChainReport {
            node_id: 1,
            total_nodes: 3,
            dataset: "housing".to_string(),
            finished_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            blocks: vec![BlockRecord {
                iteration: 0,
                producer: 0,
                hash: "4vJ9JU1bJJE96FWSJKvHsmmFADCg4gpZQff4P3bkLKi".to_string(),
                prev_hash: "11111111111111111111111111111111".to_string(),
                payload: "[0.1000, 0.2000]".to_string(),
            }],
            stats: StatsSnapshot {
                current_iteration: Some(1),
                updates_sent: 1,
                updates_received: 0,
                blocks_produced: 0,
                blocks_appended: 1,
                duplicates_ignored: 0,
            },
        }
    }

    #[test]
    fn test_text_report() {
        let text = report().render(OutputFormat::Text).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("node 1/3 dataset housing finished at 2024-05-01 12:00:00.000 UTC"));
        assert!(lines[1].contains("hash 4vJ9JU1b prev 11111111"));
        assert!(lines[1].ends_with("[0.1000, 0.2000]"));
    }

    #[test]
    fn test_json_report() {
        let json = report().render(OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["node_id"], 1);
        assert_eq!(value["blocks"][0]["producer"], 0);
        assert_eq!(value["blocks"][0]["payload"], "[0.1000, 0.2000]");
        assert_eq!(value["stats"]["blocks_appended"], 1);
        assert_eq!(value["finished_at"], "2024-05-01T12:00:00Z");
    }
}

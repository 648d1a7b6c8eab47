use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use skytrend_common::StreamFields;
use tokio::sync::Mutex;

use super::{EntryId, StreamEntry, StreamLog};

#[derive(Debug)]
struct Pending {
    consumer: String,
    delivered_at: Instant,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct Group {
    last_delivered: i64,
    pending: BTreeMap<i64, Pending>,
}

#[derive(Debug, Default)]
struct Stream {
    entries: Entries,
    next_id: i64,
    groups: HashMap<String, Group>,
}

/// In-process log for tests and single-binary runs.
#[derive(Debug, Default)]
pub struct MemoryStreamLog {
    streams: Mutex<HashMap<String, Stream>>,
}

impl MemoryStreamLog {
    pub fn new() -> Self {
        Self::default()
    }
}

type Entries = VecDeque<(i64, StreamFields)>;

fn group_mut<'a>(
    streams: &'a mut HashMap<String, Stream>,
    stream: &str,
    group: &str,
) -> Result<(&'a mut Group, &'a Entries)> {
    let Some(s) = streams.get_mut(stream) else {
        bail!("NOGROUP no such stream '{stream}'");
    };
    let Stream { entries, groups, .. } = s;
    let Some(g) = groups.get_mut(group) else {
        bail!("NOGROUP no such group '{group}' on stream '{stream}'");
    };
    Ok((g, entries))
}

fn lookup(entries: &Entries, id: i64) -> Option<StreamFields> {
    let idx = entries.binary_search_by_key(&id, |(eid, _)| *eid).ok()?;
    Some(entries[idx].1.clone())
}

#[async_trait]
impl StreamLog for MemoryStreamLog {
    async fn append(&self, stream: &str, fields: &StreamFields, max_len: u64) -> Result<EntryId> {
        let mut streams = self.streams.lock().await;
        let s = streams.entry(stream.to_string()).or_default();
        s.next_id += 1;
        let id = s.next_id;
        s.entries.push_back((id, fields.clone()));
        while s.entries.len() as u64 > max_len {
            s.entries.pop_front();
        }
        Ok(EntryId(id))
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut streams = self.streams.lock().await;
        let s = streams.entry(stream.to_string()).or_default();
        s.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut streams = self.streams.lock().await;
        let (g, entries) = group_mut(&mut streams, stream, group)?;

        // Entries are sorted by id, so the first undelivered one is a binary search away.
        let start = entries.partition_point(|(id, _)| *id <= g.last_delivered);
        let batch: Vec<(i64, StreamFields)> = entries.range(start..).take(count).cloned().collect();

        let now = Instant::now();
        let mut out = Vec::with_capacity(batch.len());
        for (id, fields) in batch {
            g.last_delivered = id;
            g.pending.insert(
                id,
                Pending {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    deliveries: 1,
                },
            );
            out.push(StreamEntry {
                id: EntryId(id),
                fields,
                deliveries: 1,
            });
        }
        Ok(out)
    }

    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut streams = self.streams.lock().await;
        let (g, entries) = group_mut(&mut streams, stream, group)?;

        let ids: Vec<i64> = g
            .pending
            .iter()
            .filter(|(_, p)| p.consumer == consumer)
            .map(|(id, _)| *id)
            .collect();

        let now = Instant::now();
        let mut out = Vec::new();
        for id in ids {
            if out.len() >= count {
                break;
            }
            let Some(fields) = lookup(entries, id) else {
                // Trimmed away while pending; nothing left to redeliver.
                g.pending.remove(&id);
                continue;
            };
            if let Some(p) = g.pending.get_mut(&id) {
                p.deliveries += 1;
                p.delivered_at = now;
                out.push(StreamEntry {
                    id: EntryId(id),
                    fields,
                    deliveries: p.deliveries,
                });
            }
        }
        Ok(out)
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut streams = self.streams.lock().await;
        let (g, entries) = group_mut(&mut streams, stream, group)?;

        let now = Instant::now();
        let ids: Vec<i64> = g
            .pending
            .iter()
            .filter(|(_, p)| p.consumer != consumer && now.duration_since(p.delivered_at) >= min_idle)
            .map(|(id, _)| *id)
            .collect();

        let mut out = Vec::new();
        for id in ids {
            if out.len() >= count {
                break;
            }
            let Some(fields) = lookup(entries, id) else {
                g.pending.remove(&id);
                continue;
            };
            if let Some(p) = g.pending.get_mut(&id) {
                p.consumer = consumer.to_string();
                p.deliveries += 1;
                p.delivered_at = now;
                out.push(StreamEntry {
                    id: EntryId(id),
                    fields,
                    deliveries: p.deliveries,
                });
            }
        }
        Ok(out)
    }

    async fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<bool> {
        let mut streams = self.streams.lock().await;
        let (g, _) = group_mut(&mut streams, stream, group)?;
        Ok(g.pending.remove(&id.0).is_some())
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        let streams = self.streams.lock().await;
        Ok(streams.get(stream).map(|s| s.entries.len() as u64).unwrap_or(0))
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let streams = self.streams.lock().await;
        Ok(streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len() as u64)
            .unwrap_or(0))
    }
}

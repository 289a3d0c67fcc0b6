//! In-process broker with consumer-group semantics.
//!
//! Used by the integration harnesses and for running the server without a
//! broker. It reproduces the parts of the group protocol the ingestion loop
//! and tails care about:
//!
//! - every group sees each matching record once, delivered round-robin to its
//!   assigned members;
//! - a member only receives records after it accepted its assignment;
//!   records published while a group has no assigned member wait in the
//!   group's backlog;
//! - joins and leaves trigger a rebalance: current members get `Revoked`
//!   followed by a fresh `Assigned`;
//! - ephemeral groups vanish with their last member, durable groups keep
//!   their backlog;
//! - records still queued for a member when it leaves were never committed,
//!   so they return to the backlog.
//!
//! Groups only exist once someone subscribed, so records published before
//! that are never seen (latest-unseen offset reset).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::transport::{
    subject_matches, Consumer, Membership, Partition, Record, StreamEvent, Subscription, Transport,
    TransportError,
};

#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    groups: HashMap<String, Group>,
    next_member: u64,
    refuse_subscriptions: Option<String>,
}

struct Group {
    pattern: String,
    membership: Membership,
    members: Vec<Member>,
    backlog: VecDeque<Record>,
    cursor: usize,
}

struct Member {
    id: u64,
    partition: Option<Partition>,
    active: bool,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl Group {
    fn rebalance(&mut self) {
        for (index, member) in self.members.iter_mut().enumerate() {
            if let Some(old) = member.partition.take() {
                let _ = member.tx.send(StreamEvent::Revoked(vec![old]));
            }
            member.active = false;
            let partition = Partition {
                topic: self.pattern.clone(),
                index: index as u32,
            };
            member.partition = Some(partition.clone());
            let _ = member.tx.send(StreamEvent::Assigned(vec![partition]));
        }
    }

    /// Hand `record` to the next assigned member, or park it.
    fn deliver(&mut self, record: Record) {
        let active: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.active)
            .map(|(i, _)| i)
            .collect();
        if active.is_empty() {
            self.backlog.push_back(record);
            return;
        }
        let member = &self.members[active[self.cursor % active.len()]];
        self.cursor = self.cursor.wrapping_add(1);
        let record = Record {
            partition: member.partition.clone().unwrap_or_else(|| record.partition.clone()),
            ..record
        };
        let _ = member.tx.send(StreamEvent::Record(record));
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `payload` on `subject` to every group whose pattern matches.
    /// Returns the number of groups that took the record.
    pub fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let mut state = self.inner.lock();
        let mut delivered = 0;
        for group in state.groups.values_mut() {
            if !subject_matches(&group.pattern, subject) {
                continue;
            }
            group.deliver(Record {
                subject: subject.to_string(),
                partition: Partition {
                    topic: group.pattern.clone(),
                    index: 0,
                },
                payload: payload.clone(),
            });
            delivered += 1;
        }
        delivered
    }

    /// Send a broker error to every member of every group.
    pub fn inject_error(&self, message: &str) {
        let state = self.inner.lock();
        for group in state.groups.values() {
            for member in &group.members {
                let _ = member
                    .tx
                    .send(StreamEvent::Error(TransportError::Broker(message.to_string())));
            }
        }
    }

    /// Send a broker error to the members of one group.
    pub fn inject_group_error(&self, group: &str, message: &str) {
        let state = self.inner.lock();
        if let Some(group) = state.groups.get(group) {
            for member in &group.members {
                let _ = member
                    .tx
                    .send(StreamEvent::Error(TransportError::Broker(message.to_string())));
            }
        }
    }

    /// Make every subscribe call fail until cleared with `None`.
    pub fn refuse_subscriptions(&self, reason: Option<&str>) {
        self.inner.lock().refuse_subscriptions = reason.map(str::to_string);
    }

    pub fn group_count(&self) -> usize {
        self.inner.lock().groups.len()
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.inner.lock().groups.contains_key(group)
    }

    pub fn member_count(&self, group: &str) -> usize {
        self.inner
            .lock()
            .groups
            .get(group)
            .map_or(0, |g| g.members.len())
    }

    /// Members of `group` that accepted their assignment.
    pub fn assigned_member_count(&self, group: &str) -> usize {
        self.inner
            .lock()
            .groups
            .get(group)
            .map_or(0, |g| g.members.iter().filter(|m| m.active).count())
    }

    /// Number of groups with at least one member that accepted its assignment.
    pub fn assigned_group_count(&self) -> usize {
        self.inner
            .lock()
            .groups
            .values()
            .filter(|g| g.members.iter().any(|m| m.active))
            .count()
    }

    /// Poll until `n` groups have an assigned member or `timeout` passes.
    pub async fn wait_for_assigned_groups(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.assigned_group_count() >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn join(&self, subscription: &Subscription) -> Result<MemoryConsumer, TransportError> {
        let mut state = self.inner.lock();
        if let Some(reason) = &state.refuse_subscriptions {
            return Err(TransportError::Subscribe(reason.clone()));
        }
        let id = state.next_member;
        state.next_member += 1;

        let group = state
            .groups
            .entry(subscription.group.clone())
            .or_insert_with(|| Group {
                pattern: subscription.topic_pattern.clone(),
                membership: subscription.membership,
                members: Vec::new(),
                backlog: VecDeque::new(),
                cursor: 0,
            });
        if group.pattern != subscription.topic_pattern {
            return Err(TransportError::Subscribe(format!(
                "group '{}' is bound to '{}'",
                subscription.group, group.pattern
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        group.members.push(Member {
            id,
            partition: None,
            active: false,
            tx,
        });
        group.rebalance();
        debug!(group = %subscription.group, member = id, "member joined");

        Ok(MemoryConsumer {
            broker: self.clone(),
            group: subscription.group.clone(),
            id,
            rx,
            left: false,
        })
    }

    fn set_active(&self, group_name: &str, id: u64, active: bool) -> Result<(), TransportError> {
        let mut state = self.inner.lock();
        let group = state
            .groups
            .get_mut(group_name)
            .ok_or(TransportError::Closed)?;
        let index = group
            .members
            .iter()
            .position(|m| m.id == id)
            .ok_or(TransportError::Closed)?;
        let member = &mut group.members[index];
        if member.partition.is_none() {
            return Err(TransportError::Broker("no partition assigned".to_string()));
        }
        member.active = active;

        if active && !group.backlog.is_empty() {
            let backlog: Vec<Record> = group.backlog.drain(..).collect();
            for record in backlog {
                group.deliver(record);
            }
            if let Some(partition) = group.members[index].partition.clone() {
                let _ = group.members[index].tx.send(StreamEvent::PartitionEof(partition));
            }
        }
        Ok(())
    }

    /// Remove a member. `unconsumed` records go back to the front of the
    /// backlog so the next assigned member picks them up.
    fn leave(&self, group_name: &str, id: u64, unconsumed: Vec<Record>) {
        let mut state = self.inner.lock();
        let Some(group) = state.groups.get_mut(group_name) else {
            return;
        };
        group.members.retain(|m| m.id != id);
        for record in unconsumed.into_iter().rev() {
            group.backlog.push_front(record);
        }
        debug!(group = %group_name, member = id, "member left");
        if group.members.is_empty() {
            if group.membership == Membership::Ephemeral {
                state.groups.remove(group_name);
            }
        } else {
            group.rebalance();
        }
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn subscribe(
        &self,
        subscription: Subscription,
    ) -> Result<Box<dyn Consumer>, TransportError> {
        Ok(Box::new(self.join(&subscription)?))
    }
}

pub struct MemoryConsumer {
    broker: MemoryBroker,
    group: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    left: bool,
}

impl MemoryConsumer {
    fn leave(&mut self) {
        if self.left {
            return;
        }
        self.left = true;
        let mut unconsumed = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            if let StreamEvent::Record(record) = event {
                unconsumed.push(record);
            }
        }
        self.broker.leave(&self.group, self.id, unconsumed);
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.leave();
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    fn group(&self) -> &str {
        &self.group
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.left {
            return None;
        }
        self.rx.recv().await
    }

    async fn assign(&mut self, _partitions: &[Partition]) -> Result<(), TransportError> {
        self.broker.set_active(&self.group, self.id, true)
    }

    async fn unassign(&mut self) -> Result<(), TransportError> {
        self.broker.set_active(&self.group, self.id, false)
    }

    async fn close(mut self: Box<Self>) -> Result<(), TransportError> {
        self.leave();
        Ok(())
    }
}

//! Message bus
//!
//! Topic based publish/subscribe for fixed-size messages.
//!
//! - `publish_sync` calls every subscriber of the topic immediately
//! - `publish_async` copies the message into the topic's `FixedQueue`;
//!   `handle` later drains every topic in registration order
//! - Subscribers run in subscription order

use super::queue::FixedQueue;
use crate::kernel::error::{KernelError, KernelResult};
use bytemuck::Pod;
use log::{debug, warn};
use std::fmt;

pub type TopicId = u32;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&[u8]) + Send>;

struct Subscriber {
    id: SubscriptionId,
    callback: Callback,
}

struct Topic {
    id: TopicId,
    pending: FixedQueue,
    subscribers: Vec<Subscriber>,
}

impl Topic {
    fn deliver(&mut self, message: &[u8]) -> usize {
        for sub in self.subscribers.iter_mut() {
            (sub.callback)(message);
        }
        self.subscribers.len()
    }
}

pub struct MessageBus {
    topics: Vec<Topic>,
    queue_depth: usize,
    next_subscription: u64,
}

impl MessageBus {
    /// A bus whose topics buffer up to `queue_depth` async messages each
    pub fn new(queue_depth: usize) -> Self {
        Self {
            topics: Vec::new(),
            queue_depth: queue_depth.max(1),
            next_subscription: 0,
        }
    }

    fn topic(&self, id: TopicId) -> KernelResult<&Topic> {
        self.topics
            .iter()
            .find(|t| t.id == id)
            .ok_or(KernelError::NotFound)
    }

    fn topic_mut(&mut self, id: TopicId) -> KernelResult<&mut Topic> {
        match self.topics.iter_mut().find(|t| t.id == id) {
            Some(topic) => Ok(topic),
            None => {
                warn!("topic {} not found", id);
                Err(KernelError::NotFound)
            }
        }
    }

    pub fn register_topic(&mut self, id: TopicId, elem_size: usize) -> KernelResult<()> {
        if self.topic(id).is_ok() {
            return Err(KernelError::AlreadyInitialized);
        }
        let pending = FixedQueue::with_capacity(elem_size, self.queue_depth)?;
        self.topics.push(Topic {
            id,
            pending,
            subscribers: Vec::new(),
        });
        debug!("registered topic {} ({} bytes)", id, elem_size);
        Ok(())
    }

    /// Remove a topic with its subscribers and any undelivered messages
    pub fn unregister_topic(&mut self, id: TopicId) -> KernelResult<()> {
        let index = self
            .topics
            .iter()
            .position(|t| t.id == id)
            .ok_or(KernelError::NotFound)?;
        self.topics.remove(index);
        Ok(())
    }

    pub fn has_topic(&self, id: TopicId) -> bool {
        self.topic(id).is_ok()
    }

    pub fn elem_size(&self, id: TopicId) -> KernelResult<usize> {
        Ok(self.topic(id)?.pending.elem_size())
    }

    pub fn subscribe<F>(&mut self, id: TopicId, callback: F) -> KernelResult<SubscriptionId>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let sub = SubscriptionId(self.next_subscription);
        let topic = self.topic_mut(id)?;
        topic.subscribers.push(Subscriber {
            id: sub,
            callback: Box::new(callback),
        });
        self.next_subscription += 1;
        Ok(sub)
    }

    /// Subscribe with a callback taking the message as a `T`
    pub fn subscribe_value<T, F>(&mut self, id: TopicId, mut callback: F) -> KernelResult<SubscriptionId>
    where
        T: Pod,
        F: FnMut(T) + Send + 'static,
    {
        if self.elem_size(id)? != std::mem::size_of::<T>() {
            return Err(KernelError::InvalidArgument("element size mismatch"));
        }
        self.subscribe(id, move |bytes| callback(bytemuck::pod_read_unaligned(bytes)))
    }

    pub fn unsubscribe(&mut self, id: TopicId, sub: SubscriptionId) -> KernelResult<()> {
        let topic = self.topic_mut(id)?;
        let index = topic
            .subscribers
            .iter()
            .position(|s| s.id == sub)
            .ok_or(KernelError::NotFound)?;
        topic.subscribers.remove(index);
        Ok(())
    }

    pub fn unsubscribe_all(&mut self, id: TopicId) -> KernelResult<()> {
        self.topic_mut(id)?.subscribers.clear();
        Ok(())
    }

    pub fn subscriber_count(&self, id: TopicId) -> KernelResult<usize> {
        Ok(self.topic(id)?.subscribers.len())
    }

    /// Deliver `message` to every subscriber before returning
    pub fn publish_sync(&mut self, id: TopicId, message: &[u8]) -> KernelResult<()> {
        let topic = self.topic_mut(id)?;
        if message.len() != topic.pending.elem_size() {
            return Err(KernelError::InvalidArgument("element size mismatch"));
        }
        topic.deliver(message);
        Ok(())
    }

    /// Queue `message` for the next `handle`; `Busy` when the topic is backed up
    pub fn publish_async(&mut self, id: TopicId, message: &[u8]) -> KernelResult<()> {
        self.topic_mut(id)?.pending.send_back(message)
    }

    pub fn publish_sync_value<T: Pod>(&mut self, id: TopicId, value: &T) -> KernelResult<()> {
        self.publish_sync(id, bytemuck::bytes_of(value))
    }

    pub fn publish_async_value<T: Pod>(&mut self, id: TopicId, value: &T) -> KernelResult<()> {
        self.publish_async(id, bytemuck::bytes_of(value))
    }

    /// Messages waiting across all topics
    pub fn pending(&self) -> usize {
        self.topics.iter().map(|t| t.pending.len()).sum()
    }

    /// Deliver every queued message; returns the number of callback calls
    pub fn handle(&mut self) -> usize {
        let mut delivered = 0;
        for topic in self.topics.iter_mut() {
            while let Some(message) = topic.pending.peek() {
                let message = message.to_vec();
                delivered += topic.deliver(&message);
                let _ = topic.pending.remove_front();
            }
        }
        delivered
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(2)
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("topics", &self.topics.iter().map(|t| t.id).collect::<Vec<_>>())
            .field("queue_depth", &self.queue_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collector() -> (Arc<Mutex<Vec<u32>>>, impl FnMut(u32) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&seen);
        (seen, move |v| out.lock().unwrap().push(v))
    }

    #[test]
    fn test_register_twice() {
        let mut bus = MessageBus::new(2);
        bus.register_topic(1, 4).unwrap();
        assert_eq!(bus.register_topic(1, 4), Err(KernelError::AlreadyInitialized));
        assert!(matches!(
            bus.register_topic(2, 0),
            Err(KernelError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unknown_topic() {
        let mut bus = MessageBus::new(2);
        assert_eq!(bus.publish_sync(9, &[0]), Err(KernelError::NotFound));
        assert_eq!(bus.subscribe(9, |_| {}).err(), Some(KernelError::NotFound));
        assert_eq!(bus.unregister_topic(9), Err(KernelError::NotFound));
    }

    #[test]
    fn test_sync_delivers_immediately() {
        let mut bus = MessageBus::new(2);
        bus.register_topic(1, 4).unwrap();
        let (seen, callback) = collector();
        bus.subscribe_value::<u32, _>(1, callback).unwrap();

        bus.publish_sync_value(1, &7u32).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn test_async_waits_for_handle() {
        let mut bus = MessageBus::new(2);
        bus.register_topic(1, 4).unwrap();
        let (seen, callback) = collector();
        bus.subscribe_value::<u32, _>(1, callback).unwrap();

        bus.publish_async_value(1, &1u32).unwrap();
        bus.publish_async_value(1, &2u32).unwrap();
        assert_eq!(bus.publish_async_value(1, &3u32), Err(KernelError::Busy));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.pending(), 2);

        assert_eq!(bus.handle(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn test_handle_order_across_topics() {
        let mut bus = MessageBus::new(2);
        let order = Arc::new(Mutex::new(Vec::new()));
        for topic in [3u32, 1] {
            bus.register_topic(topic, 1).unwrap();
            let log = Arc::clone(&order);
            bus.subscribe(topic, move |m| log.lock().unwrap().push((topic, m[0])))
                .unwrap();
        }
        bus.publish_async(1, &[10]).unwrap();
        bus.publish_async(3, &[30]).unwrap();
        bus.handle();
        assert_eq!(*order.lock().unwrap(), vec![(3, 30), (1, 10)]);
    }

    #[test]
    fn test_unsubscribe() {
        let mut bus = MessageBus::new(2);
        bus.register_topic(1, 4).unwrap();
        let (seen, callback) = collector();
        let sub = bus.subscribe_value::<u32, _>(1, callback).unwrap();
        let other = bus.subscribe(1, |_| {}).unwrap();
        assert_eq!(bus.subscriber_count(1).unwrap(), 2);

        bus.unsubscribe(1, sub).unwrap();
        assert_eq!(bus.unsubscribe(1, sub), Err(KernelError::NotFound));
        bus.publish_sync_value(1, &5u32).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        bus.unsubscribe_all(1).unwrap();
        assert_eq!(bus.subscriber_count(1).unwrap(), 0);
        assert_eq!(bus.unsubscribe(1, other), Err(KernelError::NotFound));
    }

    #[test]
    fn test_size_checks() {
        let mut bus = MessageBus::new(2);
        bus.register_topic(1, 4).unwrap();
        assert!(matches!(
            bus.subscribe_value::<u8, _>(1, |_| {}),
            Err(KernelError::InvalidArgument(_))
        ));
        assert!(matches!(
            bus.publish_sync(1, &[1, 2]),
            Err(KernelError::InvalidArgument(_))
        ));
        assert!(matches!(
            bus.publish_async(1, &[1, 2]),
            Err(KernelError::InvalidArgument(_))
        ));
    }
}

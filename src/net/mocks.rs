//! In-memory broadcast hub for tests.
//!
//! Every member joins the hub once and receives all messages broadcast by the
//! others. An optional interceptor sees each broadcast before fan-out and may
//! pass it through, rewrite it, or drop it entirely, which is how misbehavior
//! scenarios are staged without touching protocol code.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{BroadcastChannel, Delivery, Error};
use crate::group::MemberIndex;

/// Inspects a broadcast before fan-out. Returning `None` swallows the
/// message.
pub type Interceptor = Box<dyn Fn(MemberIndex, Vec<u8>) -> Option<Vec<u8>> + Send + Sync>;

struct Hub {
    subscribers: Vec<(MemberIndex, mpsc::UnboundedSender<Delivery>)>,
    interceptor: Option<Interceptor>,
}

/// Loss-free local broadcast network.
#[derive(Clone)]
pub struct LocalNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                subscribers: Vec::new(),
                interceptor: None,
            })),
        }
    }

    /// Install an interceptor applied to every subsequent broadcast.
    pub fn set_interceptor(&self, interceptor: Interceptor) {
        self.hub.lock().unwrap().interceptor = Some(interceptor);
    }

    /// Join the network as `member`, obtaining the sender half and the stream
    /// of messages broadcast by everyone else.
    pub fn join(&self, member: MemberIndex) -> (LocalChannel, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.lock().unwrap().subscribers.push((member, tx));
        (
            LocalChannel {
                member,
                hub: self.hub.clone(),
            },
            rx,
        )
    }
}

/// A member's handle on the [`LocalNetwork`].
pub struct LocalChannel {
    member: MemberIndex,
    hub: Arc<Mutex<Hub>>,
}

impl BroadcastChannel for LocalChannel {
    async fn broadcast(&self, payload: Vec<u8>) -> Result<(), Error> {
        let hub = self.hub.lock().unwrap();
        let payload = match &hub.interceptor {
            Some(interceptor) => match interceptor(self.member, payload) {
                Some(payload) => payload,
                None => return Ok(()),
            },
            None => payload,
        };
        let payload = Bytes::from(payload);
        for (subscriber, tx) in &hub.subscribers {
            if *subscriber == self.member {
                continue;
            }
            // A subscriber that hung up simply stops receiving.
            let _ = tx.send(Delivery {
                sender: self.member,
                payload: payload.clone(),
            });
        }
        Ok(())
    }
}

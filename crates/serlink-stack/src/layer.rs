//! The layer contract and the pipeline that wires layers together.
//!
//! A [`Stack`] is an ordered list of layers, top first. Layers never hold
//! references to each other: a layer hands data to its neighbors by queueing
//! a transfer on its [`Context`], and the stack routes every queued transfer
//! to exactly one neighbor once the layer's callback has returned. Down goes
//! to the next index, up to the previous one.
//!
//! Routing runs off a FIFO work queue, so a layer that emits traffic while
//! it is handling traffic (the ARQ layer acknowledging a frame that framing
//! is still delivering) never re-enters a busy layer.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use bytes::Bytes;
use serlink_transport::{EventHandler, Poller, Token};
use tracing::{trace, warn};

use crate::error::{Result, StackError};

/// Direction of a transfer between neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Toward the wire.
    Down,
    /// Toward the application.
    Up,
}

/// Data queued by a layer for one of its neighbors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub direction: Direction,
    pub data: Bytes,
}

/// What a layer callback gets to work with.
pub struct Context<'a> {
    poller: &'a mut Poller,
    transfers: Vec<Transfer>,
}

impl<'a> Context<'a> {
    pub fn new(poller: &'a mut Poller) -> Self {
        Self {
            poller,
            transfers: Vec::new(),
        }
    }

    /// The dispatcher, for timer and readiness control.
    pub fn poller(&mut self) -> &mut Poller {
        &mut *self.poller
    }

    /// Hand `data` to the lower neighbor.
    pub fn pass_down(&mut self, data: Bytes) {
        self.transfers.push(Transfer {
            direction: Direction::Down,
            data,
        });
    }

    /// Hand `data` to the upper neighbor.
    pub fn pass_up(&mut self, data: Bytes) {
        self.transfers.push(Transfer {
            direction: Direction::Up,
            data,
        });
    }

    /// Transfers queued so far, in the order they were made.
    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    pub fn into_transfers(self) -> Vec<Transfer> {
        self.transfers
    }
}

/// One processing stage of a stack.
pub trait Layer {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Register with the dispatcher. A layer that needs a descriptor watched
    /// or a timer returns the token it registered; callbacks for that token
    /// come back to this layer.
    fn attach(&mut self, poller: &mut Poller) -> Option<Token> {
        let _ = poller;
        None
    }

    /// Data from the upper neighbor, heading for the wire.
    fn send_downward(&mut self, data: Bytes, cx: &mut Context<'_>);

    /// Data from the lower neighbor, heading for the application.
    fn deliver_upward(&mut self, data: Bytes, cx: &mut Context<'_>);

    /// The registered descriptor is readable.
    fn on_readable(&mut self, cx: &mut Context<'_>) {
        let _ = cx;
    }

    /// The registered descriptor accepts writes again. Only called while the
    /// layer has write interest set on its token.
    fn on_writable(&mut self, cx: &mut Context<'_>) {
        let _ = cx;
    }

    /// The registered timer expired. It is already disarmed.
    fn on_timeout(&mut self, cx: &mut Context<'_>) {
        let _ = cx;
    }

    /// Return true once this layer wants the session to end.
    fn is_finished(&self) -> bool {
        false
    }
}

/// Collects layers top first, then attaches them to a dispatcher.
#[derive(Default)]
pub struct StackBuilder {
    layers: Vec<Box<dyn Layer>>,
}

impl StackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer below the ones added so far.
    pub fn layer(mut self, layer: impl Layer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Add an already boxed layer below the ones added so far.
    pub fn boxed(mut self, layer: Box<dyn Layer>) -> Self {
        self.layers.push(layer);
        self
    }

    /// Attach every layer to `poller` and return the wired stack.
    pub fn build(self, poller: &mut Poller) -> Result<Stack> {
        if self.layers.is_empty() {
            return Err(StackError::Empty);
        }

        let mut layers = self.layers;
        let mut owners = BTreeMap::new();
        for (index, layer) in layers.iter_mut().enumerate() {
            if let Some(token) = layer.attach(poller) {
                trace!(layer = layer.name(), token = token.0, "layer attached");
                owners.insert(token, index);
            }
        }

        Ok(Stack { layers, owners })
    }
}

/// A wired pipeline of layers, index 0 at the top.
pub struct Stack {
    layers: Vec<Box<dyn Layer>>,
    owners: BTreeMap<Token, usize>,
}

impl Stack {
    pub fn builder() -> StackBuilder {
        StackBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer names, top first.
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    /// The layer that owns `token`, if any.
    pub fn owner_of(&self, token: Token) -> Option<usize> {
        self.owners.get(&token).copied()
    }

    /// Inject application data at the top of the stack.
    pub fn submit(&mut self, data: Bytes, poller: &mut Poller) {
        self.invoke(0, poller, |layer, cx| layer.send_downward(data, cx));
    }

    /// Run the readable callback of the layer at `index`, as if its
    /// descriptor had become readable.
    pub fn drive_readable(&mut self, index: usize, poller: &mut Poller) {
        self.invoke(index, poller, |layer, cx| layer.on_readable(cx));
    }

    /// Run the writable callback of the layer at `index`.
    pub fn drive_writable(&mut self, index: usize, poller: &mut Poller) {
        self.invoke(index, poller, |layer, cx| layer.on_writable(cx));
    }

    /// Run the timeout callback of the layer at `index`.
    pub fn drive_timeout(&mut self, index: usize, poller: &mut Poller) {
        self.invoke(index, poller, |layer, cx| layer.on_timeout(cx));
    }

    /// Drive `poller` until `running` is cleared or a layer finishes.
    pub fn run(&mut self, poller: &mut Poller, running: &AtomicBool, tick: Duration) -> Result<()> {
        poller.run(self, running, tick)?;
        Ok(())
    }

    fn invoke<F>(&mut self, index: usize, poller: &mut Poller, f: F)
    where
        F: FnOnce(&mut dyn Layer, &mut Context<'_>),
    {
        let Some(layer) = self.layers.get_mut(index) else {
            warn!(index, "no layer at index");
            return;
        };
        let mut cx = Context::new(poller);
        f(layer.as_mut(), &mut cx);
        let transfers = cx.into_transfers();
        self.route(index, transfers, poller);
    }

    fn route(&mut self, origin: usize, transfers: Vec<Transfer>, poller: &mut Poller) {
        let mut queue: VecDeque<(usize, Transfer)> =
            transfers.into_iter().map(|t| (origin, t)).collect();

        while let Some((from, transfer)) = queue.pop_front() {
            let target = match transfer.direction {
                Direction::Down => from.checked_add(1).filter(|i| *i < self.layers.len()),
                Direction::Up => from.checked_sub(1),
            };
            let Some(target) = target else {
                warn!(
                    layer = self.layers[from].name(),
                    direction = ?transfer.direction,
                    len = transfer.data.len(),
                    "no neighbor, data dropped"
                );
                continue;
            };

            let layer = &mut self.layers[target];
            let mut cx = Context::new(poller);
            match transfer.direction {
                Direction::Down => layer.send_downward(transfer.data, &mut cx),
                Direction::Up => layer.deliver_upward(transfer.data, &mut cx),
            }
            queue.extend(cx.into_transfers().into_iter().map(|t| (target, t)));
        }
    }
}

impl EventHandler for Stack {
    fn on_readable(&mut self, token: Token, poller: &mut Poller) {
        match self.owner_of(token) {
            Some(index) => self.drive_readable(index, poller),
            None => warn!(token = token.0, "readable event for unknown token"),
        }
    }

    fn on_writable(&mut self, token: Token, poller: &mut Poller) {
        match self.owner_of(token) {
            Some(index) => self.drive_writable(index, poller),
            None => warn!(token = token.0, "writable event for unknown token"),
        }
    }

    fn on_timeout(&mut self, token: Token, poller: &mut Poller) {
        match self.owner_of(token) {
            Some(index) => self.drive_timeout(index, poller),
            None => warn!(token = token.0, "timeout for unknown token"),
        }
    }

    fn is_finished(&self) -> bool {
        self.layers.iter().any(|layer| layer.is_finished())
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("layers", &self.layer_names())
            .field("owners", &self.owners)
            .finish()
    }
}

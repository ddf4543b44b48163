//! Packet worker thread.
//!
//! The worker owns the packet-processing context: before every batch it
//! applies the requests queued on the main context, then runs the batch
//! through the injection nodes. Frames that arrive unclassified are steered
//! to a node by the registered input hooks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, trace};

use crate::dataplane::Dataplane;
use crate::directory::MappingDirectory;
use crate::hooks::InputHooks;
use crate::inject::{InjectCounters, InjectMode, InjectNode, NextNode};
use crate::main_context::MainContext;
use crate::packet::PacketBuffer;

/// How long the worker blocks for input before re-checking the main context
/// and the shutdown flag.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Input delivered to the worker.
pub enum WorkItem {
    /// Packets already delivered to a node, cursor at the L3 header.
    Batch {
        mode: InjectMode,
        packets: Vec<PacketBuffer>,
    },
    /// Received frames, cursor at the Ethernet header.
    Frames(Vec<PacketBuffer>),
}

/// What happened to a packet.
#[derive(Debug)]
pub enum Output {
    /// Handled by an injection node.
    Next(NextNode, PacketBuffer),
    /// Not claimed by any input hook; continues on the regular path.
    Passthrough(PacketBuffer),
}

/// Shared state the worker is built from.
pub struct WorkerConfig<D> {
    pub directory: Arc<MappingDirectory>,
    pub dataplane: Arc<D>,
    pub hooks: Arc<ArcSwap<InputHooks>>,
    pub counters: Arc<InjectCounters>,
    pub main: MainContext,
    pub input: Receiver<WorkItem>,
    pub output: Sender<Output>,
}

pub struct Worker<D> {
    arp: InjectNode<D>,
    icmp4: InjectNode<D>,
    classified: InjectNode<D>,
    dataplane: Arc<D>,
    hooks: Arc<ArcSwap<InputHooks>>,
    main: MainContext,
    input: Receiver<WorkItem>,
    output: Sender<Output>,
}

impl<D: Dataplane> Worker<D> {
    pub fn new(config: WorkerConfig<D>) -> Self {
        let node = |mode| {
            InjectNode::new(
                mode,
                Arc::clone(&config.directory),
                Arc::clone(&config.dataplane),
                Arc::clone(&config.counters),
            )
        };
        Self {
            arp: node(InjectMode::Arp),
            icmp4: node(InjectMode::Icmp4),
            classified: node(InjectMode::Classified),
            dataplane: config.dataplane,
            hooks: config.hooks,
            main: config.main,
            input: config.input,
            output: config.output,
        }
    }

    fn node(&self, mode: InjectMode) -> &InjectNode<D> {
        match mode {
            InjectMode::Arp => &self.arp,
            InjectMode::Icmp4 => &self.icmp4,
            InjectMode::Classified => &self.classified,
        }
    }

    /// Apply pending main-context requests, then process `item`.
    pub fn process(&self, item: WorkItem) {
        let applied = self.main.drain(self.dataplane.as_ref());
        if applied > 0 {
            trace!(applied, "Applied main context requests");
        }

        match item {
            WorkItem::Batch { mode, packets } => self.run_node(mode, packets),
            WorkItem::Frames(frames) => self.dispatch_frames(frames),
        }
    }

    fn dispatch_frames(&self, frames: Vec<PacketBuffer>) {
        let hooks = self.hooks.load();
        let mut batches: [Vec<PacketBuffer>; 3] = Default::default();

        for mut packet in frames {
            match hooks.steer(&mut packet, self.dataplane.as_ref()) {
                Some(mode) => batches[mode.slot()].push(packet),
                None => self.emit(Output::Passthrough(packet)),
            }
        }

        for (mode, packets) in InjectMode::ALL.into_iter().zip(batches) {
            if !packets.is_empty() {
                self.run_node(mode, packets);
            }
        }
    }

    fn run_node(&self, mode: InjectMode, mut packets: Vec<PacketBuffer>) {
        let next = self.node(mode).process(&mut packets);
        for (next, packet) in next.into_iter().zip(packets) {
            self.emit(Output::Next(next, packet));
        }
    }

    fn emit(&self, output: Output) {
        if self.output.send(output).is_err() {
            trace!("Output channel closed, dropping packet");
        }
    }

    /// Run until `shutdown` is set or the input channel closes.
    pub fn run(self, shutdown: Arc<AtomicBool>) {
        info!("Packet worker started");
        while !shutdown.load(Ordering::SeqCst) {
            match self.input.recv_timeout(IDLE_POLL) {
                Ok(item) => self.process(item),
                Err(RecvTimeoutError::Timeout) => {
                    self.main.drain(self.dataplane.as_ref());
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Worker input closed");
                    break;
                }
            }
        }
        // Requests queued before shutdown still land
        self.main.drain(self.dataplane.as_ref());
        info!("Packet worker stopped");
    }
}

/// Handle to a running worker
pub struct WorkerHandle {
    thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// Signal the worker to stop
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Wait for the worker to finish
    pub fn join(mut self) -> Result<(), String> {
        match self.thread.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| "Worker thread panicked".to_string()),
            None => Ok(()),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the packet worker thread.
pub fn spawn_worker<D: Dataplane + 'static>(worker: Worker<D>) -> std::io::Result<WorkerHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);

    let thread = thread::Builder::new()
        .name("tap-inject".to_string())
        .spawn(move || worker.run(flag))
        .inspect_err(|e| error!(error = %e, "Failed to spawn worker thread"))?;

    Ok(WorkerHandle {
        thread: Some(thread),
        shutdown,
    })
}

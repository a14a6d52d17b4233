//! Outbound OSC broadcaster
//!
//! Turns model events into wire messages toward one destination
//! endpoint. Event methods never block: they encode, then hand the
//! datagram to a bounded queue drained by a dedicated sender task.
//! A full queue drops the message; liveness pings and the periodic
//! master republish make the peers eventually consistent anyway.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use kontrol_core::{
    ChangeSource, EntityId, KontrolModel, ModelCallback, Module, Page, Parameter, Rack,
};
use kontrol_osc::{KontrolMessage, MAX_PACKET_SIZE};

use crate::{Liveness, Role};

/// Outbound queue depth.
pub const QUEUE_CAPACITY: usize = 64;

/// Forced flush interval of the sender task; bounds worst-case latency
/// if a wakeup is missed.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, PartialEq, Eq)]
struct Destination {
    host: String,
    port: u16,
}

struct LinkState {
    dest: Option<Destination>,
    source: ChangeSource,
    liveness: Liveness,
    tx: Option<mpsc::Sender<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

/// Broadcasts model changes to a single peer over UDP.
///
/// Register it as a [`ModelCallback`] on the model so mutations flow
/// through automatically; its own `ping` handler drives the
/// master-republish protocol.
pub struct OscBroadcaster {
    model: Arc<KontrolModel>,
    role: Role,
    keep_alive_secs: u32,
    state: Mutex<LinkState>,
}

impl OscBroadcaster {
    /// `source` is this broadcaster's own change-source tag: events
    /// tagged with it are echoes of traffic received on this link and
    /// are never re-broadcast.
    pub fn new(
        model: Arc<KontrolModel>,
        source: ChangeSource,
        keep_alive_secs: u32,
        role: Role,
    ) -> Self {
        OscBroadcaster {
            model,
            role,
            keep_alive_secs,
            state: Mutex::new(LinkState {
                dest: None,
                source,
                liveness: Liveness::new(Duration::from_secs(keep_alive_secs as u64)),
                tx: None,
                task: None,
            }),
        }
    }

    /// Replaces any existing destination and starts the sender task.
    ///
    /// Returns `false` on socket failure, leaving the broadcaster
    /// disconnected with no partial state.
    pub async fn connect(&self, host: &str, port: u16) -> bool {
        self.stop().await;

        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to open transmit socket");
                return false;
            }
        };
        if let Err(e) = socket.connect((host, port)).await {
            warn!(error = %e, host, port, "failed to set destination");
            return false;
        }

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let task = tokio::spawn(sender_loop(socket, rx));

        let mut state = self.state.lock();
        state.dest = Some(Destination {
            host: host.to_string(),
            port,
        });
        state.liveness = Liveness::new(Duration::from_secs(self.keep_alive_secs as u64));
        state.tx = Some(tx);
        state.task = Some(task);
        true
    }

    /// Flushes whatever is queued, joins the sender task, and discards
    /// the socket. Idempotent.
    pub async fn stop(&self) {
        let (tx, task) = {
            let mut state = self.state.lock();
            state.dest = None;
            (state.tx.take(), state.task.take())
        };
        // Closing the channel lets the sender task drain what is
        // already queued before it exits.
        drop(tx);
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().tx.is_some()
    }

    /// Whether the destination peer is currently considered alive.
    pub fn is_active(&self) -> bool {
        let state = self.state.lock();
        state.tx.is_some() && state.liveness.is_active()
    }

    /// True when an event with this source should go out on this link.
    pub fn broadcast_change(&self, src: ChangeSource) -> bool {
        src != self.state.lock().source
    }

    /// Emits this node's own heartbeat, advertising the port our
    /// receiver listens on. Bypasses the echo and liveness gates.
    pub fn send_ping(&self, port: u16) {
        if !self.is_connected() {
            return;
        }
        self.send_message(KontrolMessage::Ping {
            port,
            keep_alive: self.keep_alive_secs,
        });
    }

    /// Liveness update from a peer ping.
    ///
    /// Ignored entirely unless `(host, port)` matches the configured
    /// destination. A slave republishes its own metadata when the peer
    /// comes back; a master pushes a full snapshot of every other rack
    /// so a newly active peer receives the whole current world state.
    pub fn ping(&self, src: ChangeSource, host: &str, port: u16, keep_alive: u32) {
        let was_active = {
            let mut state = self.state.lock();
            match &state.dest {
                Some(dest) if dest.host == host && dest.port == port => {}
                _ => return,
            }
            state.source = src;
            state
                .liveness
                .note_ping(Duration::from_secs(keep_alive as u64))
        };

        match self.role {
            Role::Slave => {
                if !was_active {
                    debug!(host, port, "peer became active, republishing own metadata");
                    self.model.publish_meta_data();
                }
            }
            Role::Master => {
                if keep_alive == 0 || !was_active {
                    self.publish_snapshot(host, port);
                }
            }
        }
    }

    /// Full-state fan-out to a peer with no incremental history:
    /// rack, then per module its params, pages, current values, and
    /// MIDI-CC mappings, for every rack except the pinging one.
    fn publish_snapshot(&self, host: &str, port: u16) {
        let pinging = EntityId::for_rack(host, port);
        for rack in self.model.racks() {
            if rack.id() == &pinging {
                continue;
            }
            debug!(rack = %rack.id(), host, port, "publishing snapshot to newly active peer");
            let src = ChangeSource::Local;
            self.rack(src, &rack);
            for module in rack.modules() {
                self.module(src, &rack, module);
                for param in module.params() {
                    self.param(src, &rack, module, param);
                }
                for page in module.pages() {
                    self.page(src, &rack, module, page);
                }
                for param in module.params() {
                    self.changed(src, &rack, module, param);
                }
                for (cc, param_ids) in module.midi_mapping() {
                    for param_id in param_ids {
                        if let Some(param) = module.param(param_id) {
                            self.assign_midi_cc(src, &rack, module, param, cc);
                        }
                    }
                }
            }
        }
    }

    pub fn rack(&self, src: ChangeSource, rack: &Rack) {
        if !self.should_send(src) {
            return;
        }
        self.send_message(KontrolMessage::Rack {
            rack_id: rack.id().clone(),
            host: rack.host().to_string(),
            port: rack.port(),
        });
    }

    pub fn module(&self, src: ChangeSource, rack: &Rack, module: &Module) {
        if !self.should_send(src) {
            return;
        }
        self.send_message(KontrolMessage::Module {
            rack_id: rack.id().clone(),
            module_id: module.id().clone(),
            display_name: module.display_name().to_string(),
            module_type: module.module_type().to_string(),
        });
    }

    pub fn page(&self, src: ChangeSource, rack: &Rack, module: &Module, page: &Page) {
        if !self.should_send(src) {
            return;
        }
        self.send_message(KontrolMessage::Page {
            rack_id: rack.id().clone(),
            module_id: module.id().clone(),
            page_id: page.id().clone(),
            display_name: page.display_name().to_string(),
            param_ids: page.param_ids().to_vec(),
        });
    }

    pub fn param(&self, src: ChangeSource, rack: &Rack, module: &Module, param: &Parameter) {
        if !self.should_send(src) {
            return;
        }
        self.send_message(KontrolMessage::Param {
            rack_id: rack.id().clone(),
            module_id: module.id().clone(),
            args: param.create_args().to_vec(),
        });
    }

    pub fn changed(&self, src: ChangeSource, rack: &Rack, module: &Module, param: &Parameter) {
        if !self.should_send(src) {
            return;
        }
        self.send_message(KontrolMessage::Changed {
            rack_id: rack.id().clone(),
            module_id: module.id().clone(),
            param_id: param.id().clone(),
            value: param.current().clone(),
        });
    }

    pub fn resource(&self, src: ChangeSource, rack: &Rack, res_type: &str, name: &str) {
        if !self.should_send(src) {
            return;
        }
        self.send_message(KontrolMessage::Resource {
            rack_id: rack.id().clone(),
            res_type: res_type.to_string(),
            name: name.to_string(),
        });
    }

    pub fn delete_rack(&self, src: ChangeSource, rack: &Rack) {
        if !self.should_send(src) {
            return;
        }
        self.send_message(KontrolMessage::DeleteRack {
            rack_id: rack.id().clone(),
        });
    }

    pub fn assign_midi_cc(
        &self,
        src: ChangeSource,
        rack: &Rack,
        module: &Module,
        param: &Parameter,
        cc: u32,
    ) {
        if !self.should_send(src) {
            return;
        }
        self.send_message(KontrolMessage::AssignMidiCc {
            rack_id: rack.id().clone(),
            module_id: module.id().clone(),
            param_id: param.id().clone(),
            cc,
        });
    }

    pub fn unassign_midi_cc(
        &self,
        src: ChangeSource,
        rack: &Rack,
        module: &Module,
        param: &Parameter,
        cc: u32,
    ) {
        if !self.should_send(src) {
            return;
        }
        self.send_message(KontrolMessage::UnassignMidiCc {
            rack_id: rack.id().clone(),
            module_id: module.id().clone(),
            param_id: param.id().clone(),
            cc,
        });
    }

    pub fn update_preset(&self, src: ChangeSource, rack: &Rack, preset: &str) {
        if !self.should_send(src) {
            return;
        }
        self.send_message(KontrolMessage::UpdatePreset {
            rack_id: rack.id().clone(),
            preset: preset.to_string(),
        });
    }

    pub fn apply_preset(&self, src: ChangeSource, rack: &Rack, preset: &str) {
        if !self.should_send(src) {
            return;
        }
        self.send_message(KontrolMessage::ApplyPreset {
            rack_id: rack.id().clone(),
            preset: preset.to_string(),
        });
    }

    pub fn save_settings(&self, src: ChangeSource, rack: &Rack) {
        if !self.should_send(src) {
            return;
        }
        self.send_message(KontrolMessage::SaveSettings {
            rack_id: rack.id().clone(),
        });
    }

    pub fn load_module(
        &self,
        src: ChangeSource,
        rack: &Rack,
        module_id: &EntityId,
        module_type: &str,
    ) {
        if !self.should_send(src) {
            return;
        }
        self.send_message(KontrolMessage::LoadModule {
            rack_id: rack.id().clone(),
            module_id: module_id.clone(),
            module_type: module_type.to_string(),
        });
    }

    /// Echo suppression, then the liveness gate: an event that
    /// originated on this link never goes back out, and nothing is
    /// queued toward a dead peer.
    fn should_send(&self, src: ChangeSource) -> bool {
        let state = self.state.lock();
        state.tx.is_some() && src != state.source && state.liveness.is_active()
    }

    fn send_message(&self, msg: KontrolMessage) {
        let mut buf = msg.encode();
        buf.truncate(MAX_PACKET_SIZE);
        self.enqueue(buf);
    }

    fn enqueue(&self, buf: Vec<u8>) {
        let tx = self.state.lock().tx.clone();
        let Some(tx) = tx else { return };
        match tx.try_send(buf) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!("outbound queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

impl ModelCallback for OscBroadcaster {
    fn rack(&self, src: ChangeSource, rack: &Rack) {
        OscBroadcaster::rack(self, src, rack);
    }

    fn module(&self, src: ChangeSource, rack: &Rack, module: &Module) {
        OscBroadcaster::module(self, src, rack, module);
    }

    fn page(&self, src: ChangeSource, rack: &Rack, module: &Module, page: &Page) {
        OscBroadcaster::page(self, src, rack, module, page);
    }

    fn param(&self, src: ChangeSource, rack: &Rack, module: &Module, param: &Parameter) {
        OscBroadcaster::param(self, src, rack, module, param);
    }

    fn changed(&self, src: ChangeSource, rack: &Rack, module: &Module, param: &Parameter) {
        OscBroadcaster::changed(self, src, rack, module, param);
    }

    fn resource(&self, src: ChangeSource, rack: &Rack, res_type: &str, name: &str) {
        OscBroadcaster::resource(self, src, rack, res_type, name);
    }

    fn delete_rack(&self, src: ChangeSource, rack: &Rack) {
        OscBroadcaster::delete_rack(self, src, rack);
    }

    fn assign_midi_cc(
        &self,
        src: ChangeSource,
        rack: &Rack,
        module: &Module,
        param: &Parameter,
        cc: u32,
    ) {
        OscBroadcaster::assign_midi_cc(self, src, rack, module, param, cc);
    }

    fn unassign_midi_cc(
        &self,
        src: ChangeSource,
        rack: &Rack,
        module: &Module,
        param: &Parameter,
        cc: u32,
    ) {
        OscBroadcaster::unassign_midi_cc(self, src, rack, module, param, cc);
    }

    fn update_preset(&self, src: ChangeSource, rack: &Rack, preset: &str) {
        OscBroadcaster::update_preset(self, src, rack, preset);
    }

    fn apply_preset(&self, src: ChangeSource, rack: &Rack, preset: &str) {
        OscBroadcaster::apply_preset(self, src, rack, preset);
    }

    fn save_settings(&self, src: ChangeSource, rack: &Rack) {
        OscBroadcaster::save_settings(self, src, rack);
    }

    fn load_module(
        &self,
        src: ChangeSource,
        rack: &Rack,
        module_id: &EntityId,
        module_type: &str,
    ) {
        OscBroadcaster::load_module(self, src, rack, module_id, module_type);
    }

    fn ping(&self, src: ChangeSource, host: &str, port: u16, keep_alive: u32) {
        OscBroadcaster::ping(self, src, host, port, keep_alive);
    }
}

/// Drains the queue to the socket, then waits for the next message or
/// the poll timeout, whichever comes first. Channel closure is the
/// stop signal; `recv` hands out everything still queued before it
/// reports closed, which is the final flush.
async fn sender_loop(socket: UdpSocket, mut rx: mpsc::Receiver<Vec<u8>>) {
    loop {
        match tokio::time::timeout(POLL_TIMEOUT, rx.recv()).await {
            Ok(Some(buf)) => {
                transmit(&socket, &buf).await;
                while let Ok(buf) = rx.try_recv() {
                    transmit(&socket, &buf).await;
                }
            }
            Ok(None) => break,
            Err(_) => continue,
        }
    }
}

async fn transmit(socket: &UdpSocket, buf: &[u8]) {
    // Fire-and-forget; the only feedback loop is the peer's liveness.
    if let Err(e) = socket.send(buf).await {
        debug!(error = %e, "send failed");
    }
}

//! Inbound OSC receiver
//!
//! Accepts datagrams on a bound port, decodes them, and applies the
//! resulting mutations to the model tagged with the network origin so
//! local broadcasters can suppress the echo. Decoding is strict per
//! datagram: unknown addresses are ignored, malformed argument lists
//! are discarded whole.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use kontrol_core::{ChangeSource, EntityId, KontrolModel, KontrolResult, ParamValue};
use kontrol_osc::{KontrolMessage, MAX_PACKET_SIZE};

/// Default well-known receiver port.
pub const DEFAULT_PORT: u16 = 9000;

/// Inbound queue depth, matching the outbound side.
const INBOUND_QUEUE_CAPACITY: usize = 64;

struct RecvState {
    port: u16,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
    /// Present only in manual-poll mode; otherwise the dispatch task
    /// owns the queue's receiving end.
    inbound: Option<mpsc::Receiver<(Vec<u8>, SocketAddr)>>,
}

/// Receives and dispatches sync datagrams for one model.
pub struct OscReceiver {
    model: Arc<KontrolModel>,
    manual_poll: bool,
    state: Mutex<RecvState>,
}

impl OscReceiver {
    /// Receiver with a background dispatch task.
    pub fn new(model: Arc<KontrolModel>) -> Self {
        Self::with_mode(model, false)
    }

    /// Receiver whose caller pumps [`OscReceiver::poll`] on a thread
    /// of its own choosing instead of a background dispatch task.
    pub fn with_manual_poll(model: Arc<KontrolModel>) -> Self {
        Self::with_mode(model, true)
    }

    fn with_mode(model: Arc<KontrolModel>, manual_poll: bool) -> Self {
        OscReceiver {
            model,
            manual_poll,
            state: Mutex::new(RecvState {
                port: 0,
                shutdown: None,
                tasks: Vec::new(),
                inbound: None,
            }),
        }
    }

    /// Binds the listening socket and starts the receive task.
    ///
    /// Returns `false` if the port cannot be bound, leaving no partial
    /// state behind.
    pub async fn listen(&self, port: u16) -> bool {
        self.stop().await;

        let socket = match UdpSocket::bind(("0.0.0.0", port)).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, port, "failed to bind listening socket");
                return false;
            }
        };
        let bound_port = match socket.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                warn!(error = %e, "failed to read bound address");
                return false;
            }
        };

        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let (shutdown, stop_rx) = watch::channel(false);
        let mut tasks = vec![tokio::spawn(read_loop(socket, tx, stop_rx.clone()))];

        let mut inbound = Some(rx);
        if !self.manual_poll {
            let model = self.model.clone();
            let rx = inbound.take().expect("queue receiver just created");
            tasks.push(tokio::spawn(dispatch_loop(model, rx, stop_rx)));
        }

        let mut state = self.state.lock();
        state.port = bound_port;
        state.shutdown = Some(shutdown);
        state.tasks = tasks;
        state.inbound = inbound;
        true
    }

    /// Listens on [`DEFAULT_PORT`].
    pub async fn listen_default(&self) -> bool {
        self.listen(DEFAULT_PORT).await
    }

    /// The bound port, 0 when not listening.
    pub fn port(&self) -> u16 {
        self.state.lock().port
    }

    /// Synchronously drains and dispatches everything currently
    /// queued. Only useful in manual-poll mode.
    pub fn poll(&self) {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            let Some(rx) = state.inbound.as_mut() else {
                return;
            };
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        for (buf, origin) in drained {
            self.dispatch(&buf, origin);
        }
    }

    /// Stops the tasks and releases the socket. Idempotent.
    pub async fn stop(&self) {
        let (shutdown, tasks) = {
            let mut state = self.state.lock();
            state.port = 0;
            state.inbound = None;
            (state.shutdown.take(), std::mem::take(&mut state.tasks))
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    fn dispatch(&self, buf: &[u8], origin: SocketAddr) {
        dispatch(&self.model, buf, origin);
    }

    // Mutation entry points, tagged with the network origin. The
    // datagram path lands on these; they are public so a transport
    // embedding can drive the same dispatch directly.

    pub fn create_rack(
        &self,
        src: ChangeSource,
        rack_id: EntityId,
        host: &str,
        port: u16,
    ) -> KontrolResult<()> {
        self.model.create_rack(src, rack_id, host, port)
    }

    pub fn create_module(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        module_id: EntityId,
        display_name: &str,
        module_type: &str,
    ) -> KontrolResult<()> {
        self.model
            .create_module(src, rack_id, module_id, display_name, module_type)
    }

    pub fn create_param(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        module_id: &EntityId,
        args: Vec<ParamValue>,
    ) -> KontrolResult<()> {
        self.model.create_param(src, rack_id, module_id, args)
    }

    pub fn create_page(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        module_id: &EntityId,
        page_id: EntityId,
        display_name: &str,
        param_ids: Vec<EntityId>,
    ) -> KontrolResult<()> {
        self.model
            .create_page(src, rack_id, module_id, page_id, display_name, param_ids)
    }

    pub fn change_param(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        module_id: &EntityId,
        param_id: &EntityId,
        value: ParamValue,
    ) -> KontrolResult<()> {
        self.model
            .change_param(src, rack_id, module_id, param_id, value)
    }

    pub fn ping(&self, src: ChangeSource, host: &str, port: u16, keep_alive: u32) {
        self.model.ping(src, host, port, keep_alive);
    }
}

/// Socket read task: datagram in, bounded queue out. A full queue
/// drops the datagram; the periodic republish heals the gap.
async fn read_loop(
    socket: UdpSocket,
    tx: mpsc::Sender<(Vec<u8>, SocketAddr)>,
    mut stop: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            res = socket.recv_from(&mut buf) => match res {
                Ok((len, origin)) => {
                    match tx.try_send((buf[..len].to_vec(), origin)) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            trace!(from = %origin, "inbound queue full, dropping datagram");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
                Err(e) => warn!(error = %e, "receive error"),
            }
        }
    }
}

async fn dispatch_loop(
    model: Arc<KontrolModel>,
    mut rx: mpsc::Receiver<(Vec<u8>, SocketAddr)>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            msg = rx.recv() => match msg {
                Some((buf, origin)) => dispatch(&model, &buf, origin),
                None => break,
            }
        }
    }
}

fn dispatch(model: &Arc<KontrolModel>, buf: &[u8], origin: SocketAddr) {
    let msg = match KontrolMessage::decode(buf) {
        Ok(Some(msg)) => msg,
        Ok(None) => {
            trace!(from = %origin, "ignoring unknown address");
            return;
        }
        Err(e) => {
            debug!(from = %origin, error = %e, "discarding malformed datagram");
            return;
        }
    };

    let src = ChangeSource::RemoteOsc;
    let result = match msg {
        KontrolMessage::Ping { port, keep_alive } => {
            model.ping(src, &origin.ip().to_string(), port, keep_alive);
            Ok(())
        }
        KontrolMessage::Rack {
            rack_id,
            host,
            port,
        } => model.create_rack(src, rack_id, &host, port),
        KontrolMessage::Module {
            rack_id,
            module_id,
            display_name,
            module_type,
        } => model.create_module(src, &rack_id, module_id, &display_name, &module_type),
        KontrolMessage::Page {
            rack_id,
            module_id,
            page_id,
            display_name,
            param_ids,
        } => model.create_page(src, &rack_id, &module_id, page_id, &display_name, param_ids),
        KontrolMessage::Param {
            rack_id,
            module_id,
            args,
        } => model.create_param(src, &rack_id, &module_id, args),
        KontrolMessage::Changed {
            rack_id,
            module_id,
            param_id,
            value,
        } => model.change_param(src, &rack_id, &module_id, &param_id, value),
        KontrolMessage::Resource {
            rack_id,
            res_type,
            name,
        } => model.resource(src, &rack_id, &res_type, &name),
        KontrolMessage::DeleteRack { rack_id } => model.delete_rack(src, &rack_id),
        KontrolMessage::AssignMidiCc {
            rack_id,
            module_id,
            param_id,
            cc,
        } => model.assign_midi_cc(src, &rack_id, &module_id, &param_id, cc),
        KontrolMessage::UnassignMidiCc {
            rack_id,
            module_id,
            param_id,
            cc,
        } => model.unassign_midi_cc(src, &rack_id, &module_id, &param_id, cc),
        KontrolMessage::UpdatePreset { rack_id, preset } => {
            model.update_preset(src, &rack_id, &preset)
        }
        KontrolMessage::ApplyPreset { rack_id, preset } => {
            model.apply_preset(src, &rack_id, &preset)
        }
        KontrolMessage::SaveSettings { rack_id } => model.save_settings(src, &rack_id),
        KontrolMessage::LoadModule {
            rack_id,
            module_id,
            module_type,
        } => model.load_module(src, &rack_id, &module_id, &module_type),
    };

    if let Err(e) = result {
        debug!(from = %origin, error = %e, "model rejected message");
    }
}

//! The per-connection handler.
//!
//! Each accepted socket runs two cooperating tasks: the main task drives the
//! protocol by FSM state, and the notifier task drains the hub's notify
//! queue. Both share the write half behind a mutex so control frames stay
//! atomic, and both exit on the quit token. The notifier only writes while
//! the FSM is quiescent (re-checked under the writer lock), so broadcast
//! frames can never land inside a raw chunk region.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fs::{storage, File, Path};
use protocol::{
    Action, Channel, Message, MessageReader, MessageWriter, ProtocolError, Response, State,
};

use crate::command::{
    CommandRequest, REQ_CID, REQ_CREATE_CHANNEL, REQ_LIST_CHANNELS, REQ_LIST_FILES, REQ_SUBSCRIBE,
    REQ_SUBSCRIBE_CONNECTED_USERS,
};
use crate::config::DaemonConfig;
use crate::hub::{ClientHandle, ClientId, HubHandle, Notification};
use crate::process::Process;

/// Bound of the per-client outbound notify queue.
const NOTIFY_QUEUE_CAPACITY: usize = 16;

/// Per-connection slice of the daemon configuration.
#[derive(Debug, Clone)]
pub(crate) struct ClientOptions {
    pub root: String,
    pub buffer_size: usize,
    pub chunk_timeout: Duration,
    pub idle_timeout: Duration,
}

impl From<&DaemonConfig> for ClientOptions {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            root: config.root.clone(),
            buffer_size: config.buffer_size,
            chunk_timeout: config.chunk_timeout,
            idle_timeout: config.idle_timeout,
        }
    }
}

enum Flow {
    Continue,
    Quit,
}

type SharedWriter = Arc<Mutex<MessageWriter<OwnedWriteHalf>>>;

/// Registers the connection with the hub, runs the protocol until quit or
/// error, then unregisters and tears both tasks down.
pub(crate) async fn run_client(stream: TcpStream, hub: HubHandle, options: ClientOptions) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(error = %err, "fail to set TCP_NODELAY");
    }
    let peer = stream.peer_addr().ok();
    let (read_half, write_half) = stream.into_split();
    let reader = MessageReader::new(read_half);
    let writer: SharedWriter = Arc::new(Mutex::new(MessageWriter::new(write_half)));

    let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_QUEUE_CAPACITY);
    let id = match hub.register(ClientHandle::new(notify_tx)).await {
        Ok(id) => id,
        Err(err) => {
            warn!(error = %err, "fail to register client");
            return;
        }
    };
    info!(client = id, peer = ?peer, "client connected");

    let quit = CancellationToken::new();
    let (state_tx, state_rx) = watch::channel(State::Start);
    let notifier = tokio::spawn(run_notifier(
        id,
        notify_rx,
        state_rx,
        Arc::clone(&writer),
        quit.clone(),
    ));

    let mut client = Client {
        id,
        reader,
        writer,
        process: Process::new(options.root.clone()),
        hub: hub.clone(),
        options,
        quit: quit.clone(),
        state_tx,
        channel: None,
    };
    client.run().await;

    quit.cancel();
    if let Err(err) = hub.unregister(id).await {
        debug!(client = id, error = %err, "fail to unregister client");
    }
    if let Err(err) = notifier.await {
        debug!(client = id, error = %err, "notifier task failed");
    }
    info!(client = id, "client disconnected");
}

struct Client {
    id: ClientId,
    reader: MessageReader<OwnedReadHalf>,
    writer: SharedWriter,
    process: Process,
    hub: HubHandle,
    options: ClientOptions,
    quit: CancellationToken,
    state_tx: watch::Sender<State>,
    /// Channel subscription bound with the SUBSCRIBE command.
    channel: Option<String>,
}

impl Client {
    async fn run(&mut self) {
        loop {
            if self.quit.is_cancelled() {
                break;
            }
            let flow = match self.process.state() {
                State::Data => self.receive_chunk().await,
                State::Eof => self.finish_upload().await,
                State::Stream => self.serve_stream().await,
                State::Error => {
                    debug!(client = self.id, "exiting client after error");
                    break;
                }
                State::Start | State::Done => self.listen_message().await,
            };
            self.publish_state();
            if matches!(flow, Flow::Quit) {
                break;
            }
        }
        self.publish_state();
        debug!(
            client = self.id,
            channel = self.channel.as_deref(),
            "client loop finished"
        );
    }

    /// Mirrors the FSM state for the notifier's quiescence check.
    fn publish_state(&self) {
        self.state_tx.send_replace(self.process.state());
    }

    /// Idle wait for the next transfer, command, or quit.
    async fn listen_message(&mut self) -> Flow {
        debug!(client = self.id, "listening for client message");
        let result = tokio::select! {
            () = self.quit.cancelled() => return Flow::Quit,
            result = self.reader.read_message(self.options.idle_timeout) => result,
        };
        match result {
            Ok(message) => self.dispatch(message).await,
            Err(err) if err.is_peer_closed() => {
                info!(client = self.id, "communication closed by the client");
                Flow::Quit
            }
            Err(ProtocolError::Timeout(_)) => {
                self.fail("idle read deadline expired").await;
                Flow::Continue
            }
            Err(err) => {
                debug!(client = self.id, error = %err, "fail to read message");
                self.fail("fail to read message").await;
                Flow::Continue
            }
        }
    }

    async fn dispatch(&mut self, message: Message) -> Flow {
        if message.state().is_none() {
            if message.response() == Response::Quit {
                info!(client = self.id, "client requested quit");
                return Flow::Quit;
            }
            if message.has_command() {
                return self.handle_command(&message).await;
            }
        }
        match message.state() {
            Some(State::Start) => self.handle_start(&message).await,
            _ => {
                self.fail("wrong message state").await;
                Flow::Continue
            }
        }
    }

    async fn handle_start(&mut self, message: &Message) -> Flow {
        let payload = match message.start_payload() {
            Ok(payload) => payload,
            Err(err) => {
                debug!(client = self.id, error = %err, "undecodable start payload");
                self.fail("fail to read StartPayload").await;
                return Flow::Continue;
            }
        };
        info!(
            client = self.id,
            action = ?payload.action,
            channel = payload.channel.name(),
            file = payload.info.file.value(),
            size = payload.info.size,
            "accepting transfer request"
        );
        if let Err(err) = self.process.start(payload).await {
            self.fail(&err.to_string()).await;
            return Flow::Continue;
        }
        // Publish before answering so the notifier suppresses broadcasts for
        // the whole transfer, including the raw chunk region that follows.
        self.publish_state();

        match self.process.action() {
            Action::Upload => {
                if let Err(err) = self.write_state(State::Data).await {
                    debug!(client = self.id, error = %err, "fail to write state=DATA");
                    self.process.error();
                }
            }
            Action::Download => {
                let Some(info) = self.process.file_info() else {
                    self.fail("server error").await;
                    return Flow::Continue;
                };
                let message = match Message::stream_start(info) {
                    Ok(message) => message,
                    Err(err) => {
                        debug!(client = self.id, error = %err, "fail to encode StreamPayload");
                        self.fail("server error").await;
                        return Flow::Continue;
                    }
                };
                if let Err(err) = self.write_message(&message).await {
                    debug!(client = self.id, error = %err, "fail to write state=STREAM");
                    self.process.error();
                }
            }
        }
        Flow::Continue
    }

    /// One upload step: read a chunk under the short deadline and feed the
    /// FSM, which enforces the declared-size accounting.
    async fn receive_chunk(&mut self) -> Flow {
        match self
            .reader
            .read_chunk(self.options.chunk_timeout, self.options.buffer_size)
            .await
        {
            Ok(chunk) if chunk.is_empty() => {
                info!(client = self.id, "client closed the connection mid-upload");
                Flow::Quit
            }
            Ok(chunk) => {
                if let Err(err) = self.process.data(&chunk).await {
                    self.fail(&err.to_string()).await;
                }
                Flow::Continue
            }
            Err(ProtocolError::Timeout(_)) => {
                self.fail("timed out waiting for upload data").await;
                Flow::Continue
            }
            Err(err) if err.is_peer_closed() => Flow::Quit,
            Err(err) => {
                debug!(client = self.id, error = %err, "fail to read chunk");
                self.fail("fail to read chunk").await;
                Flow::Continue
            }
        }
    }

    /// Upload epilogue: announce `EOF`, await the peer's `EOF`, acknowledge
    /// with `DONE`, and broadcast the store change.
    async fn finish_upload(&mut self) -> Flow {
        if let Err(err) = self.write_state(State::Eof).await {
            debug!(client = self.id, error = %err, "fail to write state=EOF");
            self.process.error();
            return Flow::Continue;
        }
        let message = match self.read_confirmation("fail to read EOF message").await {
            Ok(message) => message,
            Err(flow) => return flow,
        };
        if message.state() != Some(State::Eof) {
            self.fail("expecting EOF").await;
            return Flow::Continue;
        }
        if let Err(err) = self.process.done() {
            self.fail(&err.to_string()).await;
            return Flow::Continue;
        }
        if let Err(err) = self.write_state(State::Done).await {
            debug!(client = self.id, error = %err, "fail to write state=DONE");
            self.process.error();
            return Flow::Continue;
        }
        info!(client = self.id, "upload complete, broadcasting change");
        if let Err(err) = self.hub.change().await {
            debug!(client = self.id, error = %err, "fail to broadcast change");
        }
        Flow::Continue
    }

    /// Download: await the peer's `STREAM` confirmation, stream the file,
    /// await the peer's `EOF`, answer `DONE`.
    async fn serve_stream(&mut self) -> Flow {
        let message = match self.read_confirmation("fail to read status STREAM").await {
            Ok(message) => message,
            Err(flow) => return flow,
        };
        if message.state() != Some(State::Stream) {
            self.fail("wrong client state, state=STREAM was expected").await;
            return Flow::Continue;
        }

        let streamed = {
            let mut writer = self.writer.lock().await;
            self.process
                .stream(self.options.buffer_size, writer.sink())
                .await
        };
        match streamed {
            Ok(bytes) => debug!(client = self.id, bytes, "file streamed to client"),
            Err(err) => {
                self.fail(&format!("fail to stream file: {err}")).await;
                return Flow::Continue;
            }
        }

        let message = match self.read_confirmation("fail to read state=EOF").await {
            Ok(message) => message,
            Err(flow) => return flow,
        };
        if message.state() != Some(State::Eof) {
            self.fail("expecting EOF").await;
            return Flow::Continue;
        }
        if let Err(err) = self.write_state(State::Done).await {
            debug!(client = self.id, error = %err, "fail to write state=DONE");
            self.process.error();
            return Flow::Continue;
        }
        info!(client = self.id, "download complete");
        Flow::Continue
    }

    /// Reads an in-transfer confirmation frame under the short deadline.
    async fn read_confirmation(&mut self, context: &str) -> Result<Message, Flow> {
        match self.reader.read_message(self.options.chunk_timeout).await {
            Ok(message) => Ok(message),
            Err(err) if err.is_peer_closed() => Err(Flow::Quit),
            Err(ProtocolError::Timeout(_)) => {
                self.fail("confirmation read deadline expired").await;
                Err(Flow::Continue)
            }
            Err(err) => {
                debug!(client = self.id, error = %err, context);
                self.fail(context).await;
                Err(Flow::Continue)
            }
        }
    }

    async fn handle_command(&mut self, message: &Message) -> Flow {
        let Some(command) = message.command_map() else {
            self.command_error("invalid command request").await;
            return Flow::Continue;
        };
        let request = match CommandRequest::parse(command) {
            Ok(request) => request,
            Err(err) => {
                self.command_error(&err.to_string()).await;
                return Flow::Continue;
            }
        };
        debug!(client = self.id, request = ?request, "executing command");
        match request {
            CommandRequest::Subscribe { channel } => self.subscribe(channel).await,
            CommandRequest::CreateChannel { channel } => self.create_channel(&channel).await,
            CommandRequest::ListChannels => self.list_channels().await,
            CommandRequest::ListFiles { channel } => self.list_files(&channel).await,
            CommandRequest::Cid => {
                self.respond(Message::command_response(REQ_CID, self.id.to_string()))
                    .await;
            }
            CommandRequest::ConnectedUsers => {
                if self.hub.list_request(self.id).await.is_err() {
                    self.command_error("server error").await;
                }
            }
            CommandRequest::SubscribeConnectedUsers => {
                if self.hub.subscribe_list(self.id).await.is_err() {
                    self.command_error("server error").await;
                }
            }
        }
        Flow::Continue
    }

    async fn subscribe(&mut self, channel: String) {
        if Channel::new(channel.as_str()).is_err() {
            self.command_error("invalid channel").await;
            return;
        }
        self.channel = Some(channel.clone());
        self.respond(Message::command_response(REQ_SUBSCRIBE, channel)).await;
    }

    async fn create_channel(&mut self, channel: &str) {
        let Ok(directory) = Channel::new(channel).and_then(|channel| channel.to_directory())
        else {
            self.command_error("invalid channel").await;
            return;
        };
        let target = directory.to_os_file(self.options.root.clone());
        if let Err(err) = storage::create_dir_if_not_exists(&target).await {
            debug!(client = self.id, error = %err, "fail to create channel");
            self.command_error("server error").await;
            return;
        }
        self.respond(Message::command_response(REQ_CREATE_CHANNEL, channel)).await;
    }

    async fn list_channels(&mut self) {
        let root = File::new(Path::root()).to_os_file(self.options.root.clone());
        match storage::list_names(&root).await {
            Ok(names) => self.respond_with_list(REQ_LIST_CHANNELS, &names).await,
            Err(err) => {
                debug!(client = self.id, error = %err, "fail to list channels");
                self.command_error("fail to send list of channels").await;
            }
        }
    }

    async fn list_files(&mut self, channel: &str) {
        let Ok(directory) = Channel::new(channel).and_then(|channel| channel.to_directory())
        else {
            self.command_error("invalid channel").await;
            return;
        };
        let target = directory.to_os_file(self.options.root.clone());
        match storage::list_names(&target).await {
            Ok(names) => self.respond_with_list(REQ_LIST_FILES, &names).await,
            Err(err) => {
                debug!(client = self.id, error = %err, "fail to list files");
                self.command_error("fail to send list of files").await;
            }
        }
    }

    async fn respond_with_list(&mut self, req: &str, names: &[String]) {
        let mut names = names.to_vec();
        names.sort_unstable();
        match serde_json::to_string(&names) {
            Ok(payload) => self.respond(Message::command_response(req, payload)).await,
            Err(err) => {
                debug!(client = self.id, error = %err, "fail to encode list payload");
                self.command_error("server error").await;
            }
        }
    }

    async fn respond(&mut self, message: Message) {
        if let Err(err) = self.write_message(&message).await {
            debug!(client = self.id, error = %err, "fail to write command response");
            self.process.error();
        }
    }

    /// Protocol failure: move the FSM to `ERROR` and tell the peer why. The
    /// run loop terminates on the next iteration.
    async fn fail(&mut self, reason: &str) {
        warn!(client = self.id, reason, "protocol error");
        self.process.error();
        self.publish_state();
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.write_error_state(reason).await {
            debug!(client = self.id, error = %err, "fail to write state=ERROR");
        }
    }

    /// Command failure: tell the peer, keep the session and FSM untouched.
    async fn command_error(&mut self, reason: &str) {
        debug!(client = self.id, reason, "command rejected");
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.write_error_state(reason).await {
            debug!(client = self.id, error = %err, "fail to write command error");
        }
    }

    async fn write_message(&mut self, message: &Message) -> Result<(), ProtocolError> {
        let mut writer = self.writer.lock().await;
        writer.write_message(message).await
    }

    async fn write_state(&mut self, state: State) -> Result<(), ProtocolError> {
        let mut writer = self.writer.lock().await;
        writer.write_state(state).await
    }
}

/// Drains the notify queue, forwarding updates and connected-user lists to
/// the peer only while the FSM is quiescent; anything arriving mid-transfer
/// is dropped so the raw chunk stream stays clean.
async fn run_notifier(
    id: ClientId,
    mut notifications: mpsc::Receiver<Notification>,
    state: watch::Receiver<State>,
    writer: SharedWriter,
    quit: CancellationToken,
) {
    loop {
        let notification = tokio::select! {
            () = quit.cancelled() => break,
            notification = notifications.recv() => match notification {
                Some(notification) => notification,
                None => break,
            },
        };
        if !state.borrow().is_quiescent() {
            debug!(client = id, "dropping notification mid-transfer");
            continue;
        }
        let mut writer = writer.lock().await;
        if !state.borrow().is_quiescent() {
            debug!(client = id, "dropping notification mid-transfer");
            continue;
        }
        let message = match &notification {
            Notification::Update => match Message::update(true) {
                Ok(message) => message,
                Err(err) => {
                    debug!(client = id, error = %err, "fail to encode update");
                    continue;
                }
            },
            Notification::ConnectedUsers(users) => match serde_json::to_string(users) {
                Ok(payload) => Message::command_response(REQ_SUBSCRIBE_CONNECTED_USERS, payload),
                Err(err) => {
                    debug!(client = id, error = %err, "fail to encode connected users");
                    continue;
                }
            },
        };
        if let Err(err) = writer.write_message(&message).await {
            debug!(client = id, error = %err, "fail to deliver notification");
            break;
        }
    }
}

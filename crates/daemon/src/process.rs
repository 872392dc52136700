//! The per-connection transfer FSM.
//!
//! A [`Process`] owns at most one in-flight upload or download and the
//! user/channel/file binding behind it. Transitions are driven solely by
//! caller events; the FSM never advances on timers. Any storage failure
//! inside a transition moves the FSM to `ERROR` and surfaces a descriptive
//! error; retrying or terminating is the connection handler's decision.

use thiserror::Error;
use tokio::io::AsyncWrite;

use fs::{storage, File, FileInfo, OsFile, StorageError, SEPARATOR};
use protocol::{Action, StartPayload, State};

/// Errors produced by FSM transitions.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The requested event is not permitted in the current state.
    #[error("invalid state: {0}")]
    InvalidState(State),
    /// An upload declared a size of zero.
    #[error("file sent is empty")]
    EmptyFile,
    /// A download referenced a file that is not in the store.
    #[error("requested file does not exist")]
    MissingFile,
    /// An empty chunk arrived during upload.
    #[error("empty chunk received")]
    Underflow,
    /// A chunk would take the upload past its declared size.
    #[error("upload overflow: {written} + {chunk} exceeds the declared {declared} bytes")]
    Overflow {
        declared: u64,
        written: u64,
        chunk: u64,
    },
    /// The channel name is not a valid single path component.
    #[error("invalid channel name: {0:?}")]
    InvalidChannel(String),
    /// The file path does not satisfy the path grammar.
    #[error("invalid file path: {0:?}")]
    InvalidFile(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The transfer binding held while a process is active.
#[derive(Debug)]
struct Binding {
    file: OsFile,
    declared: u64,
    written: u64,
}

/// The six-state finite-state machine governing one transfer.
#[derive(Debug)]
pub struct Process {
    state: State,
    action: Action,
    os_root: String,
    binding: Option<Binding>,
}

impl Process {
    /// A fresh process in `START` over the given OS storage root.
    #[must_use]
    pub fn new(os_root: impl Into<String>) -> Self {
        Self {
            state: State::Start,
            action: Action::Upload,
            os_root: os_root.into(),
            binding: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn action(&self) -> Action {
        self.action
    }

    /// The bound file and its declared size, if a transfer was started.
    #[must_use]
    pub fn file_info(&self) -> Option<FileInfo> {
        self.binding
            .as_ref()
            .map(|binding| FileInfo::new(binding.file.file().clone(), binding.declared))
    }

    /// Bytes still expected during an upload.
    #[must_use]
    pub fn remaining(&self) -> Option<u64> {
        match (self.state, self.binding.as_ref()) {
            (State::Data, Some(binding)) => Some(binding.declared - binding.written),
            _ => None,
        }
    }

    /// Opens a transfer.
    ///
    /// Permitted from `START`, or from the terminal `DONE`/`ERROR` states to
    /// reuse an idle process. Uploads require a positive declared size and
    /// create the target file; downloads require the file to exist and read
    /// its size. The channel directory is created if missing.
    pub async fn start(&mut self, payload: StartPayload) -> Result<(), ProcessError> {
        if !self.state.is_quiescent() {
            return Err(ProcessError::InvalidState(self.state));
        }
        match self.try_start(&payload).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state = State::Error;
                Err(err)
            }
        }
    }

    async fn try_start(&mut self, payload: &StartPayload) -> Result<(), ProcessError> {
        let channel = payload
            .channel
            .to_directory()
            .map_err(|_| ProcessError::InvalidChannel(payload.channel.name().to_owned()))?;
        let mut path = channel.path().clone();
        path.append(payload.info.file.value().split(SEPARATOR))
            .map_err(|_| ProcessError::InvalidFile(payload.info.file.value().to_owned()))?;
        let file = File::new(path).to_os_file(self.os_root.clone());

        storage::create_dir_if_not_exists(&channel.to_os_file(self.os_root.clone())).await?;

        let declared = match payload.action {
            Action::Upload => {
                if payload.info.size == 0 {
                    return Err(ProcessError::EmptyFile);
                }
                storage::create(&file).await?;
                payload.info.size
            }
            Action::Download => {
                if !storage::exists(&file).await? {
                    return Err(ProcessError::MissingFile);
                }
                storage::read_size(&file).await?
            }
        };

        self.action = payload.action;
        self.binding = Some(Binding {
            file,
            declared,
            written: 0,
        });
        self.state = match payload.action {
            Action::Upload => State::Data,
            Action::Download => State::Stream,
        };
        Ok(())
    }

    /// Appends one upload chunk.
    ///
    /// Rejects empty chunks (`Underflow`) and chunks that would pass the
    /// declared size (`Overflow`); moves to `EOF` when the declared size is
    /// reached exactly.
    pub async fn data(&mut self, chunk: &[u8]) -> Result<(), ProcessError> {
        if self.state != State::Data {
            return Err(ProcessError::InvalidState(self.state));
        }
        match self.append_chunk(chunk).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state = State::Error;
                Err(err)
            }
        }
    }

    async fn append_chunk(&mut self, chunk: &[u8]) -> Result<(), ProcessError> {
        let Some(binding) = self.binding.as_mut() else {
            return Err(ProcessError::InvalidState(self.state));
        };
        if chunk.is_empty() {
            return Err(ProcessError::Underflow);
        }
        let len = chunk.len() as u64;
        if binding.written + len > binding.declared {
            return Err(ProcessError::Overflow {
                declared: binding.declared,
                written: binding.written,
                chunk: len,
            });
        }
        storage::append_write(&binding.file, chunk).await?;
        binding.written += len;
        if binding.written == binding.declared {
            self.state = State::Eof;
        }
        Ok(())
    }

    /// Streams the bound file into `sink` in chunks of at most `buf_size`
    /// bytes, then moves to `DONE`. Returns the number of bytes streamed.
    pub async fn stream<W>(&mut self, buf_size: usize, sink: &mut W) -> Result<u64, ProcessError>
    where
        W: AsyncWrite + Unpin,
    {
        if self.state != State::Stream {
            return Err(ProcessError::InvalidState(self.state));
        }
        let Some(binding) = self.binding.as_ref() else {
            return Err(ProcessError::InvalidState(self.state));
        };
        match storage::stream_read(&binding.file, buf_size, sink).await {
            Ok(total) => {
                self.state = State::Done;
                Ok(total)
            }
            Err(err) => {
                self.state = State::Error;
                Err(err.into())
            }
        }
    }

    /// Acknowledges the peer's `EOF` after a completed upload.
    pub fn done(&mut self) -> Result<(), ProcessError> {
        if self.state != State::Eof {
            return Err(ProcessError::InvalidState(self.state));
        }
        self.state = State::Done;
        Ok(())
    }

    /// Forces the FSM into `ERROR`. Permitted from any state.
    pub fn error(&mut self) {
        self.state = State::Error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{Channel, DEF_CHANNEL};

    fn start_payload(action: Action, path: &str, size: u64) -> StartPayload {
        StartPayload {
            action,
            info: FileInfo::new(File::from_value(path).expect("valid file"), size),
            channel: Channel::new("test").expect("valid channel"),
        }
    }

    fn new_process(temp: &tempfile::TempDir) -> Process {
        Process::new(temp.path().to_string_lossy())
    }

    #[tokio::test]
    async fn upload_start_creates_channel_and_file() {
        let temp = tempfile::tempdir().expect("temp root");
        let mut process = new_process(&temp);

        process
            .start(start_payload(Action::Upload, "a.bin", 11))
            .await
            .expect("start");
        assert_eq!(process.state(), State::Data);
        assert_eq!(process.action(), Action::Upload);
        assert!(temp.path().join("test/a.bin").is_file());
    }

    #[tokio::test]
    async fn uploads_land_in_the_default_channel() {
        let temp = tempfile::tempdir().expect("temp root");
        let mut process = new_process(&temp);

        let mut payload = start_payload(Action::Upload, "file.pdf", 4);
        payload.channel = Channel::new(DEF_CHANNEL).expect("default channel");
        process.start(payload).await.expect("start");
        process.data(b"%PDF").await.expect("chunk");
        process.done().expect("done");

        assert!(temp.path().join("main/file.pdf").is_file());
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let temp = tempfile::tempdir().expect("temp root");
        let mut process = new_process(&temp);

        let error = process
            .start(start_payload(Action::Upload, "a.bin", 0))
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "file sent is empty");
        assert_eq!(process.state(), State::Error);
    }

    #[tokio::test]
    async fn upload_accumulates_exactly_the_declared_bytes() {
        let temp = tempfile::tempdir().expect("temp root");
        let mut process = new_process(&temp);

        process
            .start(start_payload(Action::Upload, "a.bin", 11))
            .await
            .expect("start");
        process.data(b"hello ").await.expect("first chunk");
        assert_eq!(process.state(), State::Data);
        assert_eq!(process.remaining(), Some(5));
        process.data(b"world").await.expect("second chunk");
        assert_eq!(process.state(), State::Eof);

        process.done().expect("done");
        assert_eq!(process.state(), State::Done);

        let content = std::fs::read(temp.path().join("test/a.bin")).expect("read back");
        assert_eq!(content, b"hello world");
    }

    #[tokio::test]
    async fn upload_overflow_is_rejected_without_writing() {
        let temp = tempfile::tempdir().expect("temp root");
        let mut process = new_process(&temp);

        process
            .start(start_payload(Action::Upload, "a.bin", 4))
            .await
            .expect("start");
        let error = process.data(b"hello").await.unwrap_err();
        assert!(matches!(error, ProcessError::Overflow { .. }));
        assert_eq!(process.state(), State::Error);

        let size = std::fs::metadata(temp.path().join("test/a.bin"))
            .expect("metadata")
            .len();
        assert_eq!(size, 0);
    }

    #[tokio::test]
    async fn empty_chunk_is_underflow() {
        let temp = tempfile::tempdir().expect("temp root");
        let mut process = new_process(&temp);

        process
            .start(start_payload(Action::Upload, "a.bin", 4))
            .await
            .expect("start");
        let error = process.data(b"").await.unwrap_err();
        assert!(matches!(error, ProcessError::Underflow));
        assert_eq!(process.state(), State::Error);
    }

    #[tokio::test]
    async fn download_of_missing_file_is_rejected() {
        let temp = tempfile::tempdir().expect("temp root");
        let mut process = new_process(&temp);

        let error = process
            .start(start_payload(Action::Download, "not-exists.txt", 0))
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "requested file does not exist");
        assert_eq!(process.state(), State::Error);
    }

    #[tokio::test]
    async fn download_streams_the_file_and_finishes() {
        let temp = tempfile::tempdir().expect("temp root");
        std::fs::create_dir(temp.path().join("test")).expect("mkdir");
        let content: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        std::fs::write(temp.path().join("test/file.pdf"), &content).expect("seed file");

        let mut process = new_process(&temp);
        process
            .start(start_payload(Action::Download, "file.pdf", 0))
            .await
            .expect("start");
        assert_eq!(process.state(), State::Stream);
        let info = process.file_info().expect("binding");
        assert_eq!(info.size, 4096);

        let mut sink = Vec::new();
        let total = process.stream(1024, &mut sink).await.expect("stream");
        assert_eq!(total, 4096);
        assert_eq!(sink, content);
        assert_eq!(process.state(), State::Done);
    }

    #[tokio::test]
    async fn nested_upload_paths_require_existing_parents() {
        let temp = tempfile::tempdir().expect("temp root");
        let mut process = new_process(&temp);

        let error = process
            .start(start_payload(Action::Upload, "nested/dir/a.bin", 4))
            .await
            .unwrap_err();
        assert!(matches!(error, ProcessError::Storage(_)));
        assert_eq!(process.state(), State::Error);
    }

    #[tokio::test]
    async fn invalid_channel_name_is_rejected() {
        let temp = tempfile::tempdir().expect("temp root");
        let mut process = new_process(&temp);

        let mut payload = start_payload(Action::Upload, "a.bin", 4);
        payload.channel = serde_json::from_str(r#"{"Name":"a/b"}"#).expect("lenient decode");
        let error = process.start(payload).await.unwrap_err();
        assert!(matches!(error, ProcessError::InvalidChannel(_)));
    }

    #[tokio::test]
    async fn transitions_are_rejected_outside_their_states() {
        let temp = tempfile::tempdir().expect("temp root");
        let mut process = new_process(&temp);

        assert!(matches!(
            process.data(b"x").await.unwrap_err(),
            ProcessError::InvalidState(State::Start)
        ));
        let mut sink = Vec::new();
        assert!(matches!(
            process.stream(1024, &mut sink).await.unwrap_err(),
            ProcessError::InvalidState(State::Start)
        ));
        assert!(matches!(
            process.done().unwrap_err(),
            ProcessError::InvalidState(State::Start)
        ));
    }

    #[tokio::test]
    async fn start_is_rejected_mid_transfer() {
        let temp = tempfile::tempdir().expect("temp root");
        let mut process = new_process(&temp);

        process
            .start(start_payload(Action::Upload, "a.bin", 4))
            .await
            .expect("start");
        let error = process
            .start(start_payload(Action::Upload, "b.bin", 4))
            .await
            .unwrap_err();
        assert!(matches!(error, ProcessError::InvalidState(State::Data)));
    }

    #[tokio::test]
    async fn idle_process_is_reusable_after_done_and_error() {
        let temp = tempfile::tempdir().expect("temp root");
        let mut process = new_process(&temp);

        process
            .start(start_payload(Action::Upload, "a.bin", 2))
            .await
            .expect("first start");
        process.data(b"ab").await.expect("chunk");
        process.done().expect("done");

        process
            .start(start_payload(Action::Upload, "b.bin", 2))
            .await
            .expect("restart after done");
        assert_eq!(process.state(), State::Data);

        process.error();
        process
            .start(start_payload(Action::Download, "a.bin", 0))
            .await
            .expect("restart after error");
        assert_eq!(process.state(), State::Stream);
    }
}

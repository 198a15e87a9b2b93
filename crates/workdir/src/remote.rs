//! Remote front over TCP
//!
//! Every frame is a 4-byte little-endian length followed by a bincode
//! payload. A connection carries one request/response exchange at a time
//! and stays open for the life of the client.
//!
//! Blobs larger than one chunk travel as a sequence of `PutBlobChunk`
//! requests or `GetBlobRange` reads, so no frame grows with the file.

use crate::front::Front;
use cairn_core::{Digest, Error, Result, RevisionId, SessionId, Tree};
use cairn_journal::{Repository, Revision, SessionInfo};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;

/// Maximum frame size (512 MiB)
const MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Largest blob slice carried by one frame (64 MiB)
pub const BLOB_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Request from client to server
#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    MkSession(String),
    ListSessions,
    FindLastRevision(String),
    GetRevision(String, RevisionId),
    GetRevisionTree(String, RevisionId),
    CommitRevision {
        session: String,
        parent: RevisionId,
        tree: Tree,
    },
    PutBlob(Vec<u8>),
    /// Append to this connection's upload; `last` stores the assembled blob
    PutBlobChunk { data: Vec<u8>, last: bool },
    GetBlobRange { digest: Digest, offset: u64, len: u64 },
    HasBlob(Digest),
}

/// Response from server to client
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    SessionId(SessionId),
    Sessions(Vec<SessionInfo>),
    LastRevision(Option<RevisionId>),
    Revision(Revision),
    Tree(Tree),
    Committed(RevisionId),
    Digest(Digest),
    /// Bytes buffered so far by an unfinished upload
    ChunkAccepted(u64),
    BlobRange { total: u64, data: Vec<u8> },
    HasBlob(bool),
    Error(WireError),
}

/// Error as carried over the wire; keeps its kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireError {
    NotFound(String),
    AlreadyExists(String),
    DuplicateSession(String),
    StaleParent {
        session: String,
        parent: RevisionId,
        head: RevisionId,
    },
    UserError(String),
    Io(String),
    CorruptBlob { digest: Digest, actual: String },
    Corrupt(String),
    Protocol(String),
}

impl From<&Error> for WireError {
    fn from(err: &Error) -> Self {
        match err {
            Error::NotFound(m) => WireError::NotFound(m.clone()),
            Error::AlreadyExists(m) => WireError::AlreadyExists(m.clone()),
            Error::DuplicateSession(m) => WireError::DuplicateSession(m.clone()),
            Error::StaleParent {
                session,
                parent,
                head,
            } => WireError::StaleParent {
                session: session.clone(),
                parent: *parent,
                head: *head,
            },
            Error::UserError(m) => WireError::UserError(m.clone()),
            Error::Io(e) => WireError::Io(e.to_string()),
            Error::CorruptBlob { digest, actual } => WireError::CorruptBlob {
                digest: *digest,
                actual: actual.clone(),
            },
            Error::Corrupt(m) => WireError::Corrupt(m.clone()),
            Error::Protocol(m) => WireError::Protocol(m.clone()),
        }
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        match err {
            WireError::NotFound(m) => Error::NotFound(m),
            WireError::AlreadyExists(m) => Error::AlreadyExists(m),
            WireError::DuplicateSession(m) => Error::DuplicateSession(m),
            WireError::StaleParent {
                session,
                parent,
                head,
            } => Error::StaleParent {
                session,
                parent,
                head,
            },
            WireError::UserError(m) => Error::UserError(m),
            WireError::Io(m) => Error::Io(std::io::Error::new(std::io::ErrorKind::Other, m)),
            WireError::CorruptBlob { digest, actual } => Error::CorruptBlob { digest, actual },
            WireError::Corrupt(m) => Error::Corrupt(m),
            WireError::Protocol(m) => Error::Protocol(m),
        }
    }
}

fn protocol(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Protocol(format!("{}: {}", context, err))
}

/// Write one length-prefixed frame
pub async fn write_frame<W, T>(stream: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(message).map_err(|e| protocol("failed to encode frame", e))?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!("frame too large: {} bytes", payload.len())));
    }

    stream
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await
        .map_err(|e| protocol("failed to write frame length", e))?;
    stream
        .write_all(&payload)
        .await
        .map_err(|e| protocol("failed to write frame payload", e))?;
    stream
        .flush()
        .await
        .map_err(|e| protocol("failed to flush frame", e))?;
    Ok(())
}

/// Read one frame; `None` if the peer closed the connection between frames
pub async fn read_frame<R, T>(stream: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(protocol("failed to read frame length", e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!("frame too large: {} bytes", len)));
    }

    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| protocol("failed to read frame payload", e))?;

    bincode::deserialize(&payload)
        .map(Some)
        .map_err(|e| protocol("malformed frame", e))
}

/// Client side: a synchronous [`Front`] driving one TCP connection
pub struct RemoteFront {
    location: String,
    runtime: Runtime,
    stream: Mutex<TcpStream>,
    chunk_size: usize,
}

impl RemoteFront {
    /// Connect to `addr` (`host:port`)
    pub fn connect(location: &str, addr: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let stream = runtime
            .block_on(TcpStream::connect(addr))
            .map_err(|e| protocol(&format!("failed to connect to {}", addr), e))?;
        stream.set_nodelay(true)?;

        tracing::debug!(addr, "connected to remote repository");
        Ok(Self {
            location: location.to_string(),
            runtime,
            stream: Mutex::new(stream),
            chunk_size: BLOB_CHUNK_SIZE,
        })
    }

    /// Split blob transfers into slices of at most `size` bytes
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.clamp(1, BLOB_CHUNK_SIZE);
        self
    }

    fn call(&self, request: Request) -> Result<Response> {
        let mut stream = self.stream.lock();
        let response = self.runtime.block_on(async {
            write_frame(&mut *stream, &request).await?;
            read_frame::<_, Response>(&mut *stream)
                .await?
                .ok_or_else(|| Error::Protocol("server closed the connection".to_string()))
        })?;

        match response {
            Response::Error(err) => Err(err.into()),
            other => Ok(other),
        }
    }
}

fn unexpected(response: Response) -> Error {
    Error::Protocol(format!("unexpected response: {:?}", response))
}

impl Front for RemoteFront {
    fn location(&self) -> &str {
        &self.location
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn mksession(&self, name: &str) -> Result<SessionId> {
        match self.call(Request::MkSession(name.to_string()))? {
            Response::SessionId(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        match self.call(Request::ListSessions)? {
            Response::Sessions(sessions) => Ok(sessions),
            other => Err(unexpected(other)),
        }
    }

    fn find_last_revision(&self, session: &str) -> Result<Option<RevisionId>> {
        match self.call(Request::FindLastRevision(session.to_string()))? {
            Response::LastRevision(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    fn get_revision(&self, session: &str, id: RevisionId) -> Result<Revision> {
        match self.call(Request::GetRevision(session.to_string(), id))? {
            Response::Revision(revision) => Ok(revision),
            other => Err(unexpected(other)),
        }
    }

    fn get_revision_tree(&self, session: &str, id: RevisionId) -> Result<Arc<Tree>> {
        match self.call(Request::GetRevisionTree(session.to_string(), id))? {
            Response::Tree(tree) => Ok(Arc::new(tree)),
            other => Err(unexpected(other)),
        }
    }

    fn commit_revision(&self, session: &str, parent: RevisionId, tree: &Tree) -> Result<RevisionId> {
        let request = Request::CommitRevision {
            session: session.to_string(),
            parent,
            tree: tree.clone(),
        };
        match self.call(request)? {
            Response::Committed(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    fn put_blob(&self, data: &[u8]) -> Result<Digest> {
        if data.len() <= self.chunk_size {
            return match self.call(Request::PutBlob(data.to_vec()))? {
                Response::Digest(digest) => Ok(digest),
                other => Err(unexpected(other)),
            };
        }

        let mut chunks = data.chunks(self.chunk_size).peekable();
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let request = Request::PutBlobChunk {
                data: chunk.to_vec(),
                last,
            };
            match self.call(request)? {
                Response::ChunkAccepted(_) if !last => {}
                Response::Digest(digest) if last => return Ok(digest),
                other => return Err(unexpected(other)),
            }
        }
        Err(Error::Protocol("upload ended without a digest".to_string()))
    }

    fn get_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let request = Request::GetBlobRange {
                digest: *digest,
                offset: data.len() as u64,
                len: self.chunk_size as u64,
            };
            match self.call(request)? {
                Response::BlobRange { total, data: chunk } => {
                    if chunk.is_empty() && (data.len() as u64) < total {
                        return Err(Error::Protocol(format!("blob {} ended early", digest)));
                    }
                    data.extend_from_slice(&chunk);
                    if data.len() as u64 >= total {
                        return Ok(data);
                    }
                }
                other => return Err(unexpected(other)),
            }
        }
    }

    fn has_blob(&self, digest: &Digest) -> Result<bool> {
        match self.call(Request::HasBlob(*digest))? {
            Response::HasBlob(present) => Ok(present),
            other => Err(unexpected(other)),
        }
    }
}

/// Server side: serves one repository to any number of clients
pub struct Server {
    listener: TcpListener,
    repo: Arc<Repository>,
}

impl Server {
    pub async fn bind(addr: &str, repo: Arc<Repository>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| protocol(&format!("failed to bind {}", addr), e))?;
        Ok(Self { listener, repo })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            addr = %self.local_addr()?,
            repo = %self.repo.root().display(),
            "serving repository"
        );

        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(|e| protocol("failed to accept connection", e))?;
            let repo = Arc::clone(&self.repo);

            tokio::spawn(async move {
                tracing::debug!(%peer, "client connected");
                match handle_connection(stream, repo).await {
                    Ok(()) => tracing::debug!(%peer, "client disconnected"),
                    Err(e) => tracing::warn!(%peer, error = %e, "connection closed with error"),
                }
            });
        }
    }
}

/// Serve requests on one connection until the client hangs up
pub async fn handle_connection(mut stream: TcpStream, repo: Arc<Repository>) -> Result<()> {
    stream.set_nodelay(true)?;

    let mut state = Connection::default();
    while let Some(request) = read_frame::<_, Request>(&mut stream).await? {
        let repo = Arc::clone(&repo);
        let (next, response) = tokio::task::spawn_blocking(move || {
            let response = state.dispatch(&repo, request);
            (state, response)
        })
        .await
        .map_err(|e| protocol("request handler failed", e))?;
        state = next;
        write_frame(&mut stream, &response).await?;
    }
    Ok(())
}

/// Per-connection transfer state
#[derive(Default)]
pub struct Connection {
    upload: Vec<u8>,
    download: Option<(Digest, Vec<u8>)>,
}

impl Connection {
    /// Run one request against the repository
    pub fn dispatch(&mut self, repo: &Repository, request: Request) -> Response {
        let result = match request {
            Request::PutBlobChunk { data, last } => {
                self.upload.extend_from_slice(&data);
                if last {
                    let upload = std::mem::take(&mut self.upload);
                    repo.put_blob(&upload).map(Response::Digest)
                } else {
                    Ok(Response::ChunkAccepted(self.upload.len() as u64))
                }
            }
            Request::GetBlobRange { digest, offset, len } => self.read_range(repo, digest, offset, len),
            other => return dispatch(repo, other),
        };

        result.unwrap_or_else(|e| Response::Error(WireError::from(&e)))
    }

    fn read_range(&mut self, repo: &Repository, digest: Digest, offset: u64, len: u64) -> Result<Response> {
        let cached = matches!(&self.download, Some((d, _)) if *d == digest);
        if !cached {
            self.download = Some((digest, repo.get_blob(&digest)?));
        }
        let Some((_, blob)) = &self.download else {
            return Err(Error::not_found(format!("blob {}", digest)));
        };

        let total = blob.len() as u64;
        if offset > total {
            return Err(Error::user(format!("range offset {} past end of blob {}", offset, digest)));
        }
        let end = total.min(offset + len.min(BLOB_CHUNK_SIZE as u64));
        let data = blob[offset as usize..end as usize].to_vec();
        if end == total {
            self.download = None;
        }
        Ok(Response::BlobRange { total, data })
    }
}

/// Run one stateless request against the repository
pub fn dispatch(repo: &Repository, request: Request) -> Response {
    let result = match request {
        Request::MkSession(name) => repo.create_session(&name).map(Response::SessionId),
        Request::ListSessions => repo.list_sessions().map(Response::Sessions),
        Request::FindLastRevision(session) => {
            repo.find_last_revision(&session).map(Response::LastRevision)
        }
        Request::GetRevision(session, id) => repo.get_revision(&session, id).map(Response::Revision),
        Request::GetRevisionTree(session, id) => repo
            .get_revision_tree(&session, id)
            .map(|tree| Response::Tree((*tree).clone())),
        Request::CommitRevision {
            session,
            parent,
            tree,
        } => repo
            .commit_revision(&session, parent, &tree)
            .map(Response::Committed),
        Request::PutBlob(data) => repo.put_blob(&data).map(Response::Digest),
        Request::HasBlob(digest) => Ok(Response::HasBlob(repo.has_blob(&digest))),
        Request::PutBlobChunk { .. } | Request::GetBlobRange { .. } => Err(Error::Protocol(
            "chunked transfers need a connection".to_string(),
        )),
    };

    result.unwrap_or_else(|e| Response::Error(WireError::from(&e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_error_keeps_kind() {
        let err = Error::StaleParent {
            session: "s".to_string(),
            parent: 2,
            head: 4,
        };
        let bytes = bincode::serialize(&Response::Error(WireError::from(&err))).unwrap();
        let decoded: Response = bincode::deserialize(&bytes).unwrap();
        match decoded {
            Response::Error(wire) => assert!(matches!(
                Error::from(wire),
                Error::StaleParent { parent: 2, head: 4, .. }
            )),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_errors_become_responses() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let repo = Repository::create(&temp_dir.path().join("repo"))?;

        assert!(matches!(
            dispatch(&repo, Request::MkSession("s".to_string())),
            Response::SessionId(1)
        ));
        assert!(matches!(
            dispatch(&repo, Request::MkSession("s".to_string())),
            Response::Error(WireError::DuplicateSession(_))
        ));
        assert!(matches!(
            dispatch(&repo, Request::FindLastRevision("other".to_string())),
            Response::LastRevision(None)
        ));
        Ok(())
    }

    #[test]
    fn test_chunked_upload_and_ranges() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let repo = Repository::create(&temp_dir.path().join("repo"))?;
        let payload: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();

        let mut conn = Connection::default();
        for (i, chunk) in payload.chunks(1000).enumerate() {
            let last = i == 2;
            match conn.dispatch(&repo, Request::PutBlobChunk { data: chunk.to_vec(), last }) {
                Response::ChunkAccepted(n) => assert_eq!(n, (i as u64 + 1) * 1000),
                Response::Digest(digest) => {
                    assert!(last);
                    assert_eq!(digest, cairn_core::hash::hash_bytes(&payload));
                }
                other => panic!("unexpected response {:?}", other),
            }
        }
        let digest = cairn_core::hash::hash_bytes(&payload);
        assert_eq!(repo.get_blob(&digest)?, payload);

        match conn.dispatch(&repo, Request::GetBlobRange { digest, offset: 2000, len: 1000 }) {
            Response::BlobRange { total, data } => {
                assert_eq!(total, 2500);
                assert_eq!(data, &payload[2000..]);
            }
            other => panic!("unexpected response {:?}", other),
        }
        assert!(matches!(
            conn.dispatch(&repo, Request::GetBlobRange { digest, offset: 3000, len: 10 }),
            Response::Error(WireError::UserError(_))
        ));
        Ok(())
    }

    #[test]
    fn test_frame_roundtrip_and_eof() -> anyhow::Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;
        runtime.block_on(async {
            let mut buf = Vec::new();
            write_frame(&mut buf, &Request::HasBlob(cairn_core::hash::hash_bytes(b"x"))).await?;

            let mut reader = &buf[..];
            let first: Option<Request> = read_frame(&mut reader).await?;
            assert!(matches!(first, Some(Request::HasBlob(_))));
            let second: Option<Request> = read_frame(&mut reader).await?;
            assert!(second.is_none());
            Ok::<(), anyhow::Error>(())
        })
    }

    #[test]
    fn test_oversized_frame_rejected() -> anyhow::Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;
        runtime.block_on(async {
            let bytes = u32::MAX.to_le_bytes();
            let mut reader = &bytes[..];
            let result: Result<Option<Request>> = read_frame(&mut reader).await;
            assert!(matches!(result, Err(Error::Protocol(_))));
            Ok::<(), anyhow::Error>(())
        })
    }
}

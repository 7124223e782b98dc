//! IPC transport via Unix domain sockets.

use compio::net::{UnixListener, UnixStream};
use std::path::Path;

/// Connect to a Unix domain socket.
///
/// # Examples
///
/// ```no_run
/// use zmq2_core::ipc;
///
/// #[compio::main]
/// async fn main() -> std::io::Result<()> {
///     let stream = ipc::connect("/tmp/zmq2.sock").await?;
///     Ok(())
/// }
/// ```
pub async fn connect<P: AsRef<Path>>(path: P) -> std::io::Result<UnixStream> {
    UnixStream::connect(path).await
}

/// Bind a Unix domain socket listener.
///
/// A socket file left behind by a previous process is removed first.
pub async fn bind<P: AsRef<Path>>(path: P) -> std::io::Result<UnixListener> {
    let path_ref = path.as_ref();
    if path_ref.exists() {
        std::fs::remove_file(path_ref)?;
    }

    UnixListener::bind(path).await
}

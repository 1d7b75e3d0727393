//! Cross-process "start streaming" / "stop streaming" notifications.
//!
//! Each subscriber binds a datagram socket named `<topic>.<pid>-<n>.sock` in a
//! shared directory; publishing sends the topic to every matching socket.
//! Nothing is queued for a subscriber that does not exist yet.
use std::{
    fs, io,
    os::unix::{fs::PermissionsExt, net::UnixDatagram as StdDatagram},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::{net::UnixDatagram, runtime::Handle, task::JoinHandle};
use tracing::{debug, trace, warn};

use crate::error::NotifyError;

const DIRECTORY_MODE: u32 = 0o700;
const MAX_TOPIC_LEN: usize = 200;

static NEXT_SOCKET: AtomicU64 = AtomicU64::new(0);

/// Default notification directory for `group_id`.
pub fn default_notify_dir(group_id: &str) -> PathBuf {
    let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    runtime_dir.join(group_id).join("notify")
}

fn validate_topic(topic: &str) -> Result<(), NotifyError> {
    let ok = !topic.is_empty()
        && topic.len() <= MAX_TOPIC_LEN
        && topic
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'));
    if ok {
        Ok(())
    } else {
        Err(NotifyError::InvalidTopic(topic.to_string()))
    }
}

fn is_subscriber_of(file_name: &str, topic: &str) -> bool {
    file_name
        .strip_prefix(topic)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(".sock"))
        .is_some_and(|id| !id.is_empty() && !id.contains('.'))
}

/// Posts and observes notifications in one directory.
#[derive(Debug, Clone)]
pub struct SocketNotifier {
    dir: PathBuf,
}

impl SocketNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn socket_err(path: &Path) -> impl Fn(io::Error) -> NotifyError + '_ {
        move |source| NotifyError::Socket {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Post `topic` to every current subscriber. Returns how many received it.
    ///
    /// Sockets left behind by dead subscribers are removed.
    pub fn publish(&self, topic: &str) -> Result<usize, NotifyError> {
        validate_topic(topic)?;
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(Self::socket_err(&self.dir)(err)),
        };
        let sender = StdDatagram::unbound().map_err(Self::socket_err(&self.dir))?;
        // A subscriber that stopped reading must not stall the publisher.
        sender
            .set_nonblocking(true)
            .map_err(Self::socket_err(&self.dir))?;
        let mut delivered = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !is_subscriber_of(&name.to_string_lossy(), topic) {
                continue;
            }
            let path = entry.path();
            match sender.send_to(topic.as_bytes(), &path) {
                Ok(_) => delivered += 1,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                    ) =>
                {
                    debug!(path = %path.display(), "removing stale subscriber socket");
                    let _ = fs::remove_file(&path);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    warn!(path = %path.display(), "subscriber queue full, notification dropped");
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "notification not delivered");
                }
            }
        }
        trace!(topic, delivered, "published");
        Ok(delivered)
    }

    /// Number of sockets currently bound for `topic`. Stale sockets count
    /// until the next [`publish`](Self::publish) removes them.
    pub fn subscriber_count(&self, topic: &str) -> Result<usize, NotifyError> {
        validate_topic(topic)?;
        match fs::read_dir(&self.dir) {
            Ok(entries) => Ok(entries
                .flatten()
                .filter(|entry| is_subscriber_of(&entry.file_name().to_string_lossy(), topic))
                .count()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(Self::socket_err(&self.dir)(err)),
        }
    }

    /// Invoke `handler` each time `topic` is posted, until the returned
    /// [`Subscription`] is dropped.
    ///
    /// Must be called from within a tokio runtime. `handler` runs on a runtime
    /// worker and should hand blocking work off.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Result<Subscription, NotifyError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        validate_topic(topic)?;
        let runtime = Handle::try_current().map_err(|_| NotifyError::NoRuntime)?;
        fs::create_dir_all(&self.dir).map_err(Self::socket_err(&self.dir))?;
        fs::set_permissions(&self.dir, fs::Permissions::from_mode(DIRECTORY_MODE))
            .map_err(Self::socket_err(&self.dir))?;

        let n = NEXT_SOCKET.fetch_add(1, Ordering::Relaxed);
        let path = self
            .dir
            .join(format!("{topic}.{}-{n}.sock", std::process::id()));
        if path.exists() {
            fs::remove_file(&path).map_err(Self::socket_err(&path))?;
        }
        let socket = {
            let _guard = runtime.enter();
            UnixDatagram::bind(&path).map_err(Self::socket_err(&path))?
        };

        let expected = topic.as_bytes().to_vec();
        let task_path = path.clone();
        let task = runtime.spawn(async move {
            let mut buf = [0u8; MAX_TOPIC_LEN + 1];
            loop {
                match socket.recv(&mut buf).await {
                    Ok(len) if buf[..len] == expected[..] => handler(),
                    Ok(len) => {
                        debug!(path = %task_path.display(), len, "ignoring unexpected payload");
                    }
                    Err(err) => {
                        warn!(path = %task_path.display(), error = %err, "subscriber socket failed");
                        break;
                    }
                }
            }
        });
        debug!(topic, path = %path.display(), "subscribed");
        Ok(Subscription { path, task })
    }
}

/// Live subscription; dropping it stops delivery and removes the socket.
#[derive(Debug)]
pub struct Subscription {
    path: PathBuf,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const START: &str = "com.lumixwebcam.startStreaming";
    const STOP: &str = "com.lumixwebcam.stopStreaming";

    #[tokio::test]
    async fn delivers_only_matching_topic() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = SocketNotifier::new(dir.path());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = notifier
            .subscribe(START, move || {
                let _ = tx.send(());
            })
            .unwrap();

        assert_eq!(notifier.publish(STOP).unwrap(), 0);
        assert_eq!(notifier.publish(START).unwrap(), 1);
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("notification not received")
            .unwrap();
    }

    #[test]
    fn full_subscriber_does_not_block_publish() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = SocketNotifier::new(dir.path());
        let path = dir.path().join(format!("{START}.idle-0.sock"));
        let _idle = StdDatagram::bind(&path).unwrap();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let publisher = notifier.clone();
        std::thread::spawn(move || {
            let counts: Vec<usize> = (0..500).map(|_| publisher.publish(START).unwrap()).collect();
            let _ = done_tx.send(counts);
        });
        let counts = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("publish blocked on a full subscriber");
        assert_eq!(counts[0], 1);
        assert!(counts.contains(&0));
        assert!(path.exists());
        assert_eq!(notifier.subscriber_count(START).unwrap(), 1);
    }

    #[tokio::test]
    async fn dropping_subscription_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = SocketNotifier::new(dir.path());
        let sub = notifier.subscribe(STOP, || {}).unwrap();
        let path = sub.path().to_path_buf();
        assert!(path.exists());
        drop(sub);
        assert!(!path.exists());
        assert_eq!(notifier.publish(STOP).unwrap(), 0);
    }

    #[tokio::test]
    async fn counts_bound_subscribers_per_topic() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = SocketNotifier::new(dir.path().join("notify"));
        assert_eq!(notifier.subscriber_count(START).unwrap(), 0);
        let _a = notifier.subscribe(START, || {}).unwrap();
        let _b = notifier.subscribe(START, || {}).unwrap();
        let _c = notifier.subscribe(STOP, || {}).unwrap();
        assert_eq!(notifier.subscriber_count(START).unwrap(), 2);
        assert_eq!(notifier.subscriber_count(STOP).unwrap(), 1);
    }

    #[test]
    fn stale_socket_is_cleaned_on_publish() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join(format!("{START}.999-0.sock"));
        drop(StdDatagram::bind(&stale).unwrap());
        assert!(stale.exists());

        let notifier = SocketNotifier::new(dir.path());
        assert_eq!(notifier.publish(START).unwrap(), 0);
        assert!(!stale.exists());
    }

    #[test]
    fn subscribe_without_runtime_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = SocketNotifier::new(dir.path())
            .subscribe(START, || {})
            .unwrap_err();
        assert_eq!(err.code(), "notify_no_runtime");
    }

    #[test]
    fn rejects_path_like_topics() {
        let notifier = SocketNotifier::new("/nonexistent");
        assert!(notifier.publish("../etc").is_err());
        assert!(notifier.publish("").is_err());
        assert_eq!(notifier.publish(START).unwrap(), 0);
    }

    #[test]
    fn subscriber_names_do_not_match_longer_topics() {
        assert!(is_subscriber_of("a.b.12-0.sock", "a.b"));
        assert!(!is_subscriber_of("a.b.c.12-0.sock", "a.b"));
        assert!(!is_subscriber_of("a.b.12-0.tmp", "a.b"));
    }
}

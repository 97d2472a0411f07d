//! External collaborator seams.
//!
//! The coordinator does not own authentication, the song catalog, or score
//! persistence. It consumes them through three narrow traits so the driver
//! stays testable with in-memory implementations and deployments can plug in
//! their real backends.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use songclash_proto::{Track, UserProfile};

/// Identity lookup: token → profile.
///
/// A `None` result is an authentication failure and terminates the
/// connection.
pub trait Directory: Send + Sync + 'static {
    /// Resolve an identity token to a user profile.
    fn resolve(&self, token: &str) -> Option<UserProfile>;
}

/// Source of round subjects.
///
/// Selection and purchase logic live outside the coordinator; each round
/// simply asks for the next track.
pub trait TrackSource: Send + Sync + 'static {
    /// The subject for the next round.
    fn next_track(&self) -> Track;
}

/// Score persistence sink, invoked once per participant at game end.
pub trait ScoreSink: Send + Sync + 'static {
    /// Record a participant's final score.
    fn record(&self, user_id: u64, score: u32);
}

impl<D: Directory> Directory for std::sync::Arc<D> {
    fn resolve(&self, token: &str) -> Option<UserProfile> {
        (**self).resolve(token)
    }
}

impl<T: TrackSource> TrackSource for std::sync::Arc<T> {
    fn next_track(&self) -> Track {
        (**self).next_track()
    }
}

impl<K: ScoreSink> ScoreSink for std::sync::Arc<K> {
    fn record(&self, user_id: u64, score: u32) {
        (**self).record(user_id, score);
    }
}

/// Directory that derives a stable guest identity from the token itself.
///
/// The default for deployments without a real account backend: any non-empty
/// token resolves, and the same token always yields the same identity.
#[derive(Debug, Default, Clone)]
pub struct GuestDirectory;

impl GuestDirectory {
    /// Create a guest directory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Directory for GuestDirectory {
    fn resolve(&self, token: &str) -> Option<UserProfile> {
        if token.is_empty() {
            return None;
        }

        let id = fnv1a(token.as_bytes());
        Some(UserProfile {
            user_id: id,
            name: format!("guest-{:04x}", id & 0xFFFF),
            icon: (id % 8) as u32,
        })
    }
}

/// FNV-1a, enough to map tokens onto stable guest ids.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Fixed token table, for tests and closed deployments.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    users: HashMap<String, UserProfile>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token → profile mapping.
    #[must_use]
    pub fn with_user(mut self, token: &str, profile: UserProfile) -> Self {
        self.users.insert(token.to_string(), profile);
        self
    }
}

impl Directory for MemoryDirectory {
    fn resolve(&self, token: &str) -> Option<UserProfile> {
        self.users.get(token).cloned()
    }
}

/// Round-robin track source over a fixed playlist.
#[derive(Debug)]
pub struct PlaylistSource {
    tracks: Vec<Track>,
    cursor: AtomicUsize,
}

impl PlaylistSource {
    /// Create a source over the given playlist.
    ///
    /// An empty playlist is replaced by the demo playlist - a round must
    /// always have a subject.
    #[must_use]
    pub fn new(tracks: Vec<Track>) -> Self {
        let tracks = if tracks.is_empty() { demo_tracks() } else { tracks };
        Self { tracks, cursor: AtomicUsize::new(0) }
    }

    /// Built-in demo playlist.
    #[must_use]
    pub fn demo() -> Self {
        Self::new(demo_tracks())
    }
}

impl TrackSource for PlaylistSource {
    fn next_track(&self) -> Track {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.tracks.len();
        self.tracks[index].clone()
    }
}

fn demo_tracks() -> Vec<Track> {
    ["Dancing Queen", "Bohemian Rhapsody", "Billie Jean", "Hey Jude", "Rolling in the Deep"]
        .into_iter()
        .map(|title| Track { title: title.to_string(), preview_url: None })
        .collect()
}

/// Sink that drops scores, logging them at debug level.
///
/// Durable score storage is an external concern; this is the default when no
/// backend is wired in.
#[derive(Debug, Default, Clone)]
pub struct NullScoreSink;

impl ScoreSink for NullScoreSink {
    fn record(&self, user_id: u64, score: u32) {
        tracing::debug!(user_id, score, "discarding final score (no sink configured)");
    }
}

/// Sink that collects scores in memory, for tests.
#[derive(Debug, Default)]
pub struct MemoryScoreSink {
    records: Mutex<Vec<(u64, u32)>>,
}

impl MemoryScoreSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded (user, score) pairs in record order.
    #[must_use]
    pub fn recorded(&self) -> Vec<(u64, u32)> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ScoreSink for MemoryScoreSink {
    fn record(&self, user_id: u64, score: u32) {
        if let Ok(mut records) = self.records.lock() {
            records.push((user_id, score));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_directory_is_stable() {
        let directory = GuestDirectory::new();

        let a = directory.resolve("alice-token").unwrap();
        let b = directory.resolve("alice-token").unwrap();
        assert_eq!(a, b);

        let other = directory.resolve("bob-token").unwrap();
        assert_ne!(a.user_id, other.user_id);
    }

    #[test]
    fn guest_directory_rejects_empty_token() {
        assert!(GuestDirectory::new().resolve("").is_none());
    }

    #[test]
    fn memory_directory_resolves_registered_tokens_only() {
        let profile = UserProfile { user_id: 1, name: "ana".to_string(), icon: 0 };
        let directory = MemoryDirectory::new().with_user("tok-a", profile.clone());

        assert_eq!(directory.resolve("tok-a"), Some(profile));
        assert_eq!(directory.resolve("tok-b"), None);
    }

    #[test]
    fn playlist_source_round_robins() {
        let source = PlaylistSource::new(vec![
            Track { title: "one".to_string(), preview_url: None },
            Track { title: "two".to_string(), preview_url: None },
        ]);

        assert_eq!(source.next_track().title, "one");
        assert_eq!(source.next_track().title, "two");
        assert_eq!(source.next_track().title, "one");
    }

    #[test]
    fn memory_sink_collects_records() {
        let sink = MemoryScoreSink::new();
        sink.record(1, 3);
        sink.record(2, 0);

        assert_eq!(sink.recorded(), vec![(1, 3), (2, 0)]);
    }
}

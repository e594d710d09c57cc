use crate::media::{MediaStream, RemoteParticipant};

/// Outcome of [`RosterRegistry::on_stream_add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAdd {
    Added,
    Duplicate,
    UnknownOwner,
}

/// Remote participants and the streams they own.
///
/// Updated by the session task only. Every recorded stream maps to a
/// participant currently in the roster: streams of unknown owners are
/// rejected, and a peer's streams are purged when the peer leaves.
#[derive(Debug, Clone, Default)]
pub struct RosterRegistry {
    participants: Vec<RemoteParticipant>,
    streams: Vec<MediaStream>,
}

impl RosterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a joining peer. Returns `false` if the peer was already known,
    /// in which case only its display name is refreshed.
    pub fn on_peer_join(&mut self, peer: RemoteParticipant) -> bool {
        match self.participant_mut(&peer.peer_id) {
            Some(existing) => {
                existing.display_name = peer.display_name;
                false
            }
            None => {
                self.participants.push(peer);
                true
            }
        }
    }

    /// Remove a peer together with every stream it owns.
    ///
    /// Returns the purged streams so callers can announce their removal,
    /// or `None` if the peer was unknown.
    pub fn on_peer_leave(&mut self, peer_id: &str) -> Option<Vec<MediaStream>> {
        let index = self.participants.iter().position(|p| p.peer_id == peer_id)?;
        self.participants.remove(index);

        let (purged, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.streams)
            .into_iter()
            .partition(|s| s.owner_id == peer_id);
        self.streams = kept;
        Some(purged)
    }

    pub fn on_stream_add(&mut self, stream: MediaStream) -> StreamAdd {
        if self.participant(&stream.owner_id).is_none() {
            return StreamAdd::UnknownOwner;
        }
        if self.stream(&stream.stream_id).is_some() {
            return StreamAdd::Duplicate;
        }
        self.streams.push(stream);
        StreamAdd::Added
    }

    pub fn on_stream_remove(&mut self, stream_id: &str) -> Option<MediaStream> {
        let index = self.streams.iter().position(|s| s.stream_id == stream_id)?;
        Some(self.streams.remove(index))
    }

    /// Owner of a stream, if both are still present.
    pub fn resolve_participant(&self, stream_id: &str) -> Option<&RemoteParticipant> {
        let stream = self.stream(stream_id)?;
        self.participant(&stream.owner_id)
    }

    pub fn participant(&self, peer_id: &str) -> Option<&RemoteParticipant> {
        self.participants.iter().find(|p| p.peer_id == peer_id)
    }

    fn participant_mut(&mut self, peer_id: &str) -> Option<&mut RemoteParticipant> {
        self.participants.iter_mut().find(|p| p.peer_id == peer_id)
    }

    pub fn stream(&self, stream_id: &str) -> Option<&MediaStream> {
        self.streams.iter().find(|s| s.stream_id == stream_id)
    }

    pub fn participants(&self) -> &[RemoteParticipant] {
        &self.participants
    }

    pub fn streams(&self) -> &[MediaStream] {
        &self.streams
    }

    pub fn clear(&mut self) {
        self.participants.clear();
        self.streams.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, name: &str) -> RemoteParticipant {
        RemoteParticipant {
            peer_id: id.to_string(),
            display_name: name.to_string(),
        }
    }

    fn stream(id: &str, owner: &str) -> MediaStream {
        MediaStream {
            stream_id: id.to_string(),
            owner_id: owner.to_string(),
            audio_track: Some(format!("{id}-audio")),
            video_track: None,
        }
    }

    #[test]
    fn join_is_idempotent_and_refreshes_name() {
        let mut roster = RosterRegistry::new();
        assert!(roster.on_peer_join(peer("p1", "Alice")));
        assert!(!roster.on_peer_join(peer("p1", "Alice B.")));
        assert_eq!(roster.participants().len(), 1);
        assert_eq!(roster.participant("p1").unwrap().display_name, "Alice B.");
    }

    #[test]
    fn stream_resolves_to_owner() {
        let mut roster = RosterRegistry::new();
        roster.on_peer_join(peer("p1", "Alice"));
        assert_eq!(roster.on_stream_add(stream("s1", "p1")), StreamAdd::Added);
        assert_eq!(roster.resolve_participant("s1").unwrap().peer_id, "p1");
        assert!(roster.resolve_participant("unknown").is_none());
    }

    #[test]
    fn stream_of_unknown_owner_rejected() {
        let mut roster = RosterRegistry::new();
        assert_eq!(roster.on_stream_add(stream("s1", "ghost")), StreamAdd::UnknownOwner);
        assert!(roster.streams().is_empty());
    }

    #[test]
    fn duplicate_stream_ignored() {
        let mut roster = RosterRegistry::new();
        roster.on_peer_join(peer("p1", "Alice"));
        roster.on_stream_add(stream("s1", "p1"));
        assert_eq!(roster.on_stream_add(stream("s1", "p1")), StreamAdd::Duplicate);
        assert_eq!(roster.streams().len(), 1);
    }

    #[test]
    fn peer_leave_purges_owned_streams() {
        let mut roster = RosterRegistry::new();
        roster.on_peer_join(peer("p1", "Alice"));
        roster.on_peer_join(peer("p2", "Bob"));
        roster.on_stream_add(stream("s1", "p1"));
        roster.on_stream_add(stream("s2", "p1"));
        roster.on_stream_add(stream("s3", "p2"));

        let purged = roster.on_peer_leave("p1").unwrap();
        let mut purged_ids: Vec<_> = purged.iter().map(|s| s.stream_id.as_str()).collect();
        purged_ids.sort();
        assert_eq!(purged_ids, ["s1", "s2"]);

        assert!(roster.resolve_participant("s1").is_none());
        assert!(roster.resolve_participant("s2").is_none());
        assert_eq!(roster.resolve_participant("s3").unwrap().peer_id, "p2");
        assert_eq!(roster.streams().len(), 1);
    }

    #[test]
    fn rejoin_does_not_resurrect_purged_streams() {
        let mut roster = RosterRegistry::new();
        roster.on_peer_join(peer("p1", "Alice"));
        roster.on_stream_add(stream("s1", "p1"));
        roster.on_peer_leave("p1");
        roster.on_peer_join(peer("p1", "Alice"));
        assert!(roster.resolve_participant("s1").is_none());
    }

    #[test]
    fn unknown_peer_leave_is_none() {
        let mut roster = RosterRegistry::new();
        assert!(roster.on_peer_leave("nobody").is_none());
    }

    #[test]
    fn stream_remove_removes_exactly_one() {
        let mut roster = RosterRegistry::new();
        roster.on_peer_join(peer("p1", "Alice"));
        roster.on_stream_add(stream("s1", "p1"));
        roster.on_stream_add(stream("s2", "p1"));
        assert_eq!(roster.on_stream_remove("s1").unwrap().stream_id, "s1");
        assert!(roster.on_stream_remove("s1").is_none());
        assert_eq!(roster.streams().len(), 1);
    }

    #[test]
    fn clear_resets_everything() {
        let mut roster = RosterRegistry::new();
        roster.on_peer_join(peer("p1", "Alice"));
        roster.on_stream_add(stream("s1", "p1"));
        roster.clear();
        assert!(roster.participants().is_empty());
        assert!(roster.streams().is_empty());
    }
}

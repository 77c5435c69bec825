//! Raft-style leader election and log replication (§4.5, C5).
//!
//! Grounded on `legacy::ReplicationManager`'s log-per-shard bookkeeping, generalized to a
//! single cluster-wide log with term/vote tracking and RPC-driven elections over
//! [`Transport`](crate::transport::Transport).

use std::sync::Arc;
use std::sync::RwLock;

use metrics::{counter, gauge};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::ConsensusError;
use crate::legacy::NodeId;
use crate::types::{ConsensusState, LogCommand, LogEntry, RaftRole, RaftRoleState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate: NodeId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader: NodeId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    pub match_index: u64,
}

struct Inner {
    node_id: NodeId,
    peers: RwLock<Vec<NodeId>>,
    state: RwLock<ConsensusState>,
    log: RwLock<Vec<LogEntry>>,
    commit_index: RwLock<u64>,
    last_heartbeat: RwLock<Instant>,
    election_notify: Notify,
}

/// Follower/candidate/leader state machine for a single node, holding its own copy of the
/// replicated log. `propose_command` only succeeds on the current leader.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(node_id: NodeId, peers: Vec<NodeId>) -> Self {
        Self {
            inner: Arc::new(Inner {
                node_id,
                peers: RwLock::new(peers),
                state: RwLock::new(ConsensusState::default()),
                log: RwLock::new(Vec::new()),
                commit_index: RwLock::new(0),
                last_heartbeat: RwLock::new(Instant::now()),
                election_notify: Notify::new(),
            }),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    pub fn set_peers(&self, peers: Vec<NodeId>) {
        *self.inner.peers.write().unwrap() = peers;
    }

    pub fn peers(&self) -> Vec<NodeId> {
        self.inner.peers.read().unwrap().clone()
    }

    pub fn current_term(&self) -> u64 {
        self.inner.state.read().unwrap().current_term
    }

    pub fn role(&self) -> RaftRole {
        self.inner.state.read().unwrap().role.into()
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.inner.state.read().unwrap().role, RaftRoleState::Leader)
    }

    pub fn leader(&self) -> Option<NodeId> {
        self.inner.state.read().unwrap().leader.clone()
    }

    pub fn commit_index(&self) -> u64 {
        *self.inner.commit_index.read().unwrap()
    }

    fn last_log_index_term(&self) -> (u64, u64) {
        let log = self.inner.log.read().unwrap();
        match log.last() {
            Some(entry) => (entry.index, entry.term),
            None => (0, 0),
        }
    }

    /// A single-node cluster self-elects immediately (used by `bootstrap`).
    pub fn become_leader_unopposed(&self) {
        let mut state = self.inner.state.write().unwrap();
        state.current_term += 1;
        state.role = RaftRoleState::Leader;
        state.leader = Some(self.inner.node_id.clone());
        state.voted_for = Some(self.inner.node_id.clone());
        let term = state.current_term;
        drop(state);
        gauge!("cluster_raft_role", "node" => self.inner.node_id.0.clone()).set(1.0);
        gauge!("cluster_raft_term", "node" => self.inner.node_id.0.clone()).set(term as f64);
        info!(term, "became leader unopposed");
    }

    pub fn note_heartbeat(&self) {
        *self.inner.last_heartbeat.write().unwrap() = Instant::now();
    }

    pub fn time_since_heartbeat(&self) -> Duration {
        self.inner.last_heartbeat.read().unwrap().elapsed()
    }

    /// §4.5 `RequestVote` handling: grants once per term, only to a candidate at least as
    /// up to date as the local log.
    pub fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        let mut state = self.inner.state.write().unwrap();
        if args.term < state.current_term {
            return RequestVoteReply { term: state.current_term, vote_granted: false };
        }
        if args.term > state.current_term {
            state.current_term = args.term;
            state.role = RaftRoleState::Follower;
            state.voted_for = None;
            state.leader = None;
        }
        let (last_index, last_term) = self.last_log_index_term();
        let candidate_up_to_date = args.last_log_term > last_term
            || (args.last_log_term == last_term && args.last_log_index >= last_index);
        let can_vote = state.voted_for.is_none() || state.voted_for.as_ref() == Some(&args.candidate);
        let grant = can_vote && candidate_up_to_date;
        if grant {
            state.voted_for = Some(args.candidate.clone());
            drop(state);
            self.note_heartbeat();
            debug!(candidate = %args.candidate.0, "vote granted");
            return RequestVoteReply { term: args.term, vote_granted: true };
        }
        RequestVoteReply { term: state.current_term, vote_granted: false }
    }

    /// §4.5 `AppendEntries` handling, including the heartbeat-only (`entries` empty) case.
    pub fn handle_append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
        let mut state = self.inner.state.write().unwrap();
        if args.term < state.current_term {
            return AppendEntriesReply { term: state.current_term, success: false, match_index: 0 };
        }
        state.current_term = args.term;
        state.role = RaftRoleState::Follower;
        state.leader = Some(args.leader.clone());
        drop(state);
        self.note_heartbeat();

        let mut log = self.inner.log.write().unwrap();
        if args.prev_log_index > 0 {
            match log.iter().find(|e| e.index == args.prev_log_index) {
                Some(entry) if entry.term == args.prev_log_term => {}
                _ => {
                    return AppendEntriesReply {
                        term: args.term,
                        success: false,
                        match_index: log.last().map(|e| e.index).unwrap_or(0),
                    }
                }
            }
        }
        log.retain(|e| e.index <= args.prev_log_index);
        for entry in &args.entries {
            log.push(entry.clone());
        }
        let match_index = log.last().map(|e| e.index).unwrap_or(0);
        drop(log);

        if args.leader_commit > self.commit_index() {
            let new_commit = args.leader_commit.min(match_index);
            *self.inner.commit_index.write().unwrap() = new_commit;
        }
        AppendEntriesReply { term: args.term, success: true, match_index }
    }

    /// Appends a command to the local log if this node is the leader; the caller (coordinator
    /// loop) is responsible for replicating it to followers via the transport.
    pub fn propose_command(&self, command: LogCommand) -> Result<LogEntry, ConsensusError> {
        let mut state = self.inner.state.write().unwrap();
        if !matches!(state.role, RaftRoleState::Leader) {
            return Err(ConsensusError::NotLeader(state.leader.clone()));
        }
        let term = state.current_term;
        drop(state);
        let mut log = self.inner.log.write().unwrap();
        let index = log.last().map(|e| e.index + 1).unwrap_or(1);
        let entry = LogEntry { index, term, command };
        log.push(entry.clone());
        Ok(entry)
    }

    /// Advances the commit index once a majority of `match_indexes` (including self) agree.
    pub fn advance_commit_index(&self, mut match_indexes: Vec<u64>) {
        match_indexes.push(self.last_log_index_term().0);
        match_indexes.sort_unstable();
        let majority = match_indexes[match_indexes.len() / 2];
        let mut commit = self.inner.commit_index.write().unwrap();
        if majority > *commit {
            *commit = majority;
            gauge!("cluster_commit_index", "node" => self.inner.node_id.0.clone()).set(majority as f64);
        }
    }

    pub fn entries_from(&self, index: u64) -> Vec<LogEntry> {
        self.inner
            .log
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.index > index)
            .cloned()
            .collect()
    }

    pub fn log_len(&self) -> u64 {
        self.last_log_index_term().0
    }

    /// Waits out a randomized `[T, 2T)` election timeout, per §4.5; returns early if a
    /// heartbeat arrives first so the caller's election loop can simply re-check `role()`.
    pub async fn wait_for_election_timeout(&self, base: Duration) {
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
        let timeout = base + Duration::from_millis(jitter_ms);
        sleep(timeout).await;
    }

    /// Transitions to candidate and bumps the term, preparing this node to solicit votes.
    pub fn start_election(&self) -> RequestVoteArgs {
        let mut state = self.inner.state.write().unwrap();
        state.current_term += 1;
        state.role = RaftRoleState::Candidate;
        state.voted_for = Some(self.inner.node_id.clone());
        state.leader = None;
        let term = state.current_term;
        drop(state);
        let (last_index, last_term) = self.last_log_index_term();
        counter!("cluster_elections_started_total", "node" => self.inner.node_id.0.clone()).increment(1);
        gauge!("cluster_raft_role", "node" => self.inner.node_id.0.clone()).set(0.0);
        warn!(term, "starting election");
        RequestVoteArgs { term, candidate: self.inner.node_id.clone(), last_log_index: last_index, last_log_term: last_term }
    }

    /// Applies the outcome of a vote round: becomes leader on majority, steps down to
    /// follower if a higher term was observed anywhere in the replies.
    pub fn conclude_election(&self, term: u64, votes_granted: usize, cluster_size: usize, highest_observed_term: u64) {
        let mut state = self.inner.state.write().unwrap();
        if highest_observed_term > state.current_term {
            state.current_term = highest_observed_term;
            state.role = RaftRoleState::Follower;
            state.voted_for = None;
            return;
        }
        if state.current_term != term || !matches!(state.role, RaftRoleState::Candidate) {
            return;
        }
        if votes_granted * 2 > cluster_size {
            state.role = RaftRoleState::Leader;
            state.leader = Some(self.inner.node_id.clone());
            drop(state);
            counter!("cluster_elections_won_total", "node" => self.inner.node_id.0.clone()).increment(1);
            gauge!("cluster_raft_role", "node" => self.inner.node_id.0.clone()).set(1.0);
            info!(term, votes_granted, "elected leader");
        } else {
            state.role = RaftRoleState::Follower;
        }
    }

    pub fn notify_election_needed(&self) {
        self.inner.election_notify.notify_one();
    }

    pub async fn wait_for_election_signal(&self) {
        self.inner.election_notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::new(id)
    }

    #[test]
    fn single_node_becomes_leader_unopposed() {
        let coordinator = Coordinator::new(node("n0"), vec![]);
        coordinator.become_leader_unopposed();
        assert!(coordinator.is_leader());
        assert_eq!(coordinator.leader(), Some(node("n0")));
    }

    #[test]
    fn grants_vote_to_up_to_date_candidate() {
        let coordinator = Coordinator::new(node("n0"), vec![node("n1")]);
        let reply = coordinator.handle_request_vote(RequestVoteArgs {
            term: 1,
            candidate: node("n1"),
            last_log_index: 0,
            last_log_term: 0,
        });
        assert!(reply.vote_granted);
    }

    #[test]
    fn rejects_vote_for_stale_term() {
        let coordinator = Coordinator::new(node("n0"), vec![]);
        coordinator.handle_request_vote(RequestVoteArgs { term: 5, candidate: node("n1"), last_log_index: 0, last_log_term: 0 });
        let reply = coordinator.handle_request_vote(RequestVoteArgs { term: 2, candidate: node("n2"), last_log_index: 0, last_log_term: 0 });
        assert!(!reply.vote_granted);
        assert_eq!(reply.term, 5);
    }

    #[test]
    fn propose_command_fails_when_not_leader() {
        let coordinator = Coordinator::new(node("n0"), vec![]);
        let err = coordinator
            .propose_command(LogCommand::Opaque(vec![1, 2, 3]))
            .unwrap_err();
        assert!(matches!(err, ConsensusError::NotLeader(_)));
    }

    #[test]
    fn propose_command_appends_when_leader() {
        let coordinator = Coordinator::new(node("n0"), vec![]);
        coordinator.become_leader_unopposed();
        let entry = coordinator.propose_command(LogCommand::Opaque(vec![9])).unwrap();
        assert_eq!(entry.index, 1);
        assert_eq!(coordinator.log_len(), 1);
    }

    #[test]
    fn append_entries_from_valid_leader_extends_log() {
        let coordinator = Coordinator::new(node("n1"), vec![]);
        let reply = coordinator.handle_append_entries(AppendEntriesArgs {
            term: 1,
            leader: node("n0"),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![LogEntry { index: 1, term: 1, command: LogCommand::Opaque(vec![1]) }],
            leader_commit: 1,
        });
        assert!(reply.success);
        assert_eq!(coordinator.commit_index(), 1);
        assert_eq!(coordinator.leader(), Some(node("n0")));
    }

    #[test]
    fn conclude_election_requires_majority() {
        let coordinator = Coordinator::new(node("n0"), vec![node("n1"), node("n2")]);
        let args = coordinator.start_election();
        coordinator.conclude_election(args.term, 1, 3, args.term);
        assert!(!coordinator.is_leader());
        coordinator.conclude_election(args.term, 2, 3, args.term);
        assert!(coordinator.is_leader());
    }

    #[test]
    fn higher_observed_term_steps_down_candidate() {
        let coordinator = Coordinator::new(node("n0"), vec![node("n1")]);
        let args = coordinator.start_election();
        coordinator.conclude_election(args.term, 1, 2, args.term + 5);
        assert!(!coordinator.is_leader());
        assert_eq!(coordinator.current_term(), args.term + 5);
    }
}

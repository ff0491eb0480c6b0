use core::time::Duration;
use std::sync::Arc;
use std::thread;

use eyre::{eyre, Result as EyreResult};
use skein_gossip::fallen_behind::FallenBehindMonitor;
use skein_primitives::clock::SystemClock;
use skein_primitives::connection::TcpConnection;
use skein_primitives::hash::Hash;
use skein_primitives::node::NodeId;
use skein_primitives::protocol::PeerProtocol;
use skein_primitives::roster::Roster;
use skein_primitives::status::{PlatformStatus, RecordingStatusSubmitter, SharedStatus};
use skein_primitives::window::EventWindow;
use skein_reconnect::error::{ReconnectError, StateValidationError};
use skein_reconnect::learner::ReconnectLearner;
use skein_reconnect::metrics::ReconnectMetrics;
use skein_reconnect::permit::ReconnectPromise;
use skein_reconnect::protocol::{StateSyncContext, StateSyncPeerProtocol};
use skein_reconnect::state::{
    ReservedSignedState, SigSet, Signature, SignatureVerifier, SignedState, SignedStateNexus,
    StateSnapshot,
};
use skein_reconnect::teacher::ReconnectTeacher;
use skein_reconnect::throttle::{RateLimitedLogger, TeacherThrottle};
use skein_reconnect::transfer::{SnapshotStateTransfer, PAGE_SIZE};
use skein_reconnect::validator::DefaultStateValidator;
use skein_reconnect::SigningThreshold;

/// Trusts signatures from a fixed set of signers.
struct TrustOnly(Vec<NodeId>);

impl SignatureVerifier for TrustOnly {
    fn verify(&self, signer: NodeId, _hash: &Hash, _signature: &Signature) -> bool {
        self.0.contains(&signer)
    }
}

struct Node {
    context: Arc<StateSyncContext>,
    status: Arc<SharedStatus>,
    metrics: Arc<ReconnectMetrics>,
}

fn roster() -> Roster {
    Roster::uniform((1..=4).map(NodeId::new), 10)
}

fn signed(round: u64, payload: Vec<u8>, signers: &[u64]) -> SignedState {
    let mut sigs = SigSet::new();
    for signer in signers {
        sigs.add(NodeId::new(*signer), Signature(signer.to_le_bytes().to_vec()));
    }

    SignedState::new(
        StateSnapshot {
            round,
            roster: roster(),
            event_window: EventWindow::new(round, round.saturating_add(1), 1, 1),
            payload,
        },
        sigs,
    )
    .expect("hash")
}

fn node(trusted: &[u64], latest: Option<SignedState>) -> Node {
    let status = Arc::new(SharedStatus::new(PlatformStatus::Active));
    let metrics = Arc::new(ReconnectMetrics::unregistered());
    let transfer = Arc::new(SnapshotStateTransfer);
    let nexus = Arc::new(SignedStateNexus::new());

    if let Some(state) = latest {
        nexus.set(ReservedSignedState::new(Arc::new(state)));
    }

    let context = Arc::new(StateSyncContext {
        roster: roster(),
        signing_threshold: SigningThreshold::StrongMinority,
        status: Arc::clone(&status) as _,
        fallen_behind: Arc::new(FallenBehindMonitor::new(
            1,
            0.5,
            Arc::new(RecordingStatusSubmitter::default()),
        )),
        promise: Arc::new(ReconnectPromise::new()),
        throttle: Arc::new(TeacherThrottle::new(
            1,
            Duration::from_secs(600),
            Arc::new(SystemClock),
        )),
        nexus,
        learner: ReconnectLearner::new(
            roster(),
            Duration::from_secs(5),
            Arc::clone(&transfer) as _,
            Arc::new(DefaultStateValidator::new(SigningThreshold::StrongMinority)),
            Arc::new(TrustOnly(trusted.iter().copied().map(NodeId::new).collect())),
            Arc::clone(&metrics),
        ),
        teacher: ReconnectTeacher::new(
            Duration::from_secs(5),
            transfer,
            Arc::clone(&metrics),
        ),
        rejection_log: RateLimitedLogger::new(Duration::from_secs(60), Arc::new(SystemClock)),
        metrics: Arc::clone(&metrics),
    });

    Node {
        context,
        status,
        metrics,
    }
}

fn should_initiate(protocol: &mut StateSyncPeerProtocol) -> bool {
    <StateSyncPeerProtocol as PeerProtocol<TcpConnection>>::should_initiate(protocol)
}

fn should_accept(protocol: &mut StateSyncPeerProtocol) -> bool {
    <StateSyncPeerProtocol as PeerProtocol<TcpConnection>>::should_accept(protocol)
}

/// Negotiates and runs one reconnect, `learner` on node 1 and `teacher` on node 2.
fn reconnect(
    learner: &Node,
    teacher: &Node,
) -> EyreResult<(Result<(), ReconnectError>, Result<(), ReconnectError>)> {
    let (one, two) = (NodeId::new(1), NodeId::new(2));

    learner.context.fallen_behind.report(two);

    let mut learning = StateSyncPeerProtocol::new(two, Arc::clone(&learner.context));
    let mut teaching = StateSyncPeerProtocol::new(one, Arc::clone(&teacher.context));

    if !should_initiate(&mut learning) {
        return Err(eyre!("learner did not initiate"));
    }
    if !should_accept(&mut teaching) {
        return Err(eyre!("teacher did not accept"));
    }

    let (learner_end, teacher_end) = TcpConnection::loopback_pair(one, two)?;

    let outcome = thread::scope(|scope| {
        let taught = scope.spawn(|| teaching.run_protocol(&teacher_end));
        let learned = learning.run_protocol(&learner_end);
        taught.join().map(|taught| (learned, taught))
    });

    outcome.map_err(|_| eyre!("teacher thread panicked"))
}

#[tokio::test]
async fn test_learner_catches_up_from_teacher() -> EyreResult<()> {
    let mut payload = vec![7_u8; PAGE_SIZE * 3];
    let stale = signed(10, payload.clone(), &[1, 2, 3]);
    payload[PAGE_SIZE + 1] = 8;
    let fresh = signed(20, payload.clone(), &[2, 3]);
    let fresh_hash = *fresh.hash();

    let learner = node(&[1, 2, 3, 4], Some(stale));
    let teacher = node(&[1, 2, 3, 4], Some(fresh));

    let (learned, taught) = reconnect(&learner, &teacher)?;
    learned?;
    taught?;

    let received = learner
        .context
        .promise
        .receive()
        .await
        .ok_or_else(|| eyre!("learner outcome"))?;

    assert_eq!(received.round(), 20);
    assert_eq!(*received.hash(), fresh_hash, "same state as the teacher's");
    assert_eq!(received.snapshot().payload, payload);
    assert_eq!(received.sigs().len(), 2);

    assert_eq!(learner.metrics.learner_finished_count(), 1);
    assert_eq!(teacher.metrics.teacher_finished_count(), 1);
    assert_eq!(teacher.context.throttle.active(), 0, "teaching session closed");
    assert!(teacher.context.promise.acquire(), "teacher may learn again");

    Ok(())
}

#[tokio::test]
async fn test_untrusted_signatures_fail_validation() -> EyreResult<()> {
    let stale = signed(10, vec![1; 100], &[1, 2]);
    let fresh = signed(20, vec![2; 100], &[2, 3]);

    // only node 2's signature survives pruning: 10 of 40 is not a strong minority
    let learner = node(&[2], Some(stale));
    let teacher = node(&[1, 2, 3, 4], Some(fresh));

    let (learned, taught) = reconnect(&learner, &teacher)?;

    let Err(err) = learned else {
        return Err(eyre!("learner accepted an under-signed state"));
    };
    assert!(
        matches!(
            err,
            ReconnectError::Validation(StateValidationError::InsufficientSigningWeight {
                weight: 10,
                total: 40,
                ..
            })
        ),
        "{err}"
    );
    assert!(taught.is_err(), "teacher never hears the learner finish");

    assert!(learner.context.promise.receive().await.is_none(), "failure handed over");
    assert_eq!(
        learner.context.nexus.get().map(|state| state.round()),
        Some(10),
        "local state untouched"
    );
    assert_eq!(learner.metrics.learner_finished_count(), 0);
    assert_eq!(teacher.context.throttle.active(), 0, "teaching session closed");

    Ok(())
}

#[test]
fn test_teacher_refuses_while_not_active() {
    let teacher = node(&[1, 2, 3, 4], Some(signed(20, vec![], &[2, 3])));
    let mut teaching = StateSyncPeerProtocol::new(NodeId::new(1), Arc::clone(&teacher.context));

    teacher.status.set(PlatformStatus::Behind);
    assert!(!should_accept(&mut teaching), "behind");

    teacher.status.set(PlatformStatus::Checking);
    assert!(!should_accept(&mut teaching), "not active");

    assert_eq!(teacher.metrics.rejection_count(NodeId::new(1)), 2);
    assert_eq!(teacher.context.throttle.active(), 0);
}

#[test]
fn test_teacher_refuses_an_incomplete_state() {
    let teacher = node(&[1, 2, 3, 4], Some(signed(20, vec![], &[2])));
    let mut teaching = StateSyncPeerProtocol::new(NodeId::new(1), Arc::clone(&teacher.context));

    assert!(!should_accept(&mut teaching));
    assert!(teacher.context.promise.acquire(), "no teaching block left behind");
}

#[test]
fn test_learner_needs_an_endorsing_peer() {
    let learner = node(&[1, 2, 3, 4], None);
    let mut learning =
        StateSyncPeerProtocol::new(NodeId::new(3), Arc::clone(&learner.context));

    assert!(!should_initiate(&mut learning), "not behind yet");

    learner.context.fallen_behind.report(NodeId::new(2));
    assert!(!should_initiate(&mut learning), "node 3 never reported us");
    assert!(!learner.context.promise.is_learning());
}

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use skein_primitives::event::PlatformEvent;
use skein_primitives::hash::Hash;
use skein_primitives::node::NodeId;
use skein_primitives::window::EventWindow;
use skein_shadowgraph::ShadowEvent;

use crate::error::SyncError;

/// Events neither side considers ancient that the peer is not known to have.
pub fn unknown_non_ancient<'a>(
    known: &'a HashSet<Arc<ShadowEvent>>,
    my_window: &'a EventWindow,
    their_window: &'a EventWindow,
) -> impl Fn(&ShadowEvent) -> bool + 'a {
    move |event| {
        !known.contains(event)
            && !my_window.is_ancient(event.descriptor())
            && !their_window.is_ancient(event.descriptor())
    }
}

/// For each tip the peer advertised, whether we hold it.
#[must_use]
pub fn get_their_tips_i_have(their_tips: &[Option<Arc<ShadowEvent>>]) -> Vec<bool> {
    their_tips.iter().map(Option::is_some).collect()
}

/// Our tips the peer confirmed having, given its answer to our advertised tips.
pub fn get_my_tips_they_know(
    peer: NodeId,
    my_tips: &[Arc<ShadowEvent>],
    their_answer: &[bool],
) -> Result<Vec<Arc<ShadowEvent>>, SyncError> {
    if my_tips.len() != their_answer.len() {
        return Err(SyncError::TipCountMismatch {
            peer,
            expected: my_tips.len(),
            received: their_answer.len(),
        });
    }

    Ok(my_tips
        .iter()
        .zip(their_answer)
        .filter(|(_, known)| **known)
        .map(|(tip, _)| Arc::clone(tip))
        .collect())
}

/// Orders events so that parents always precede their children.
pub fn sort_for_sending(events: &mut [PlatformEvent]) {
    events.sort_by_key(|event| (event.generation(), event.birth_round(), event.hash()));
}

/// Drops events the peer most likely already has through other neighbors.
///
/// Walking children before parents, an event is kept if we created it, if it is a parent of an
/// event already kept, or if it has been around longer than `threshold`. Young events that are
/// neither ours nor needed as ancestors are withheld; the peer will get them from their creator
/// or in a later sync once they are old enough.
#[must_use]
pub fn filter_likely_duplicates(
    self_id: NodeId,
    threshold: Duration,
    now: Instant,
    sorted: Vec<PlatformEvent>,
) -> Vec<PlatformEvent> {
    let mut parents_to_keep: HashSet<Hash> = HashSet::new();
    let mut kept = VecDeque::with_capacity(sorted.len());

    for event in sorted.into_iter().rev() {
        let keep = event.creator() == self_id
            || parents_to_keep.contains(&event.hash())
            || now.saturating_duration_since(event.time_received()) > threshold;

        if keep {
            parents_to_keep.extend(event.parents().iter().map(|parent| parent.hash));
            kept.push_front(event);
        }
    }

    kept.into()
}

#[cfg(test)]
mod tests {
    use skein_primitives::event::GossipEvent;

    use super::*;

    fn event_at(
        creator: u64,
        birth_round: u64,
        parents: &[&PlatformEvent],
        time_received: Instant,
    ) -> PlatformEvent {
        let parents = parents.iter().map(|parent| *parent.descriptor()).collect();
        PlatformEvent::new(
            GossipEvent::new(NodeId::new(creator), birth_round, parents, vec![]),
            time_received,
        )
    }

    #[test]
    fn test_tip_answers_must_match_tip_count() {
        let result = get_my_tips_they_know(NodeId::new(3), &[], &[true]);

        assert!(
            matches!(
                result,
                Err(SyncError::TipCountMismatch {
                    expected: 0,
                    received: 1,
                    ..
                })
            ),
            "length mismatch is a protocol violation"
        );
    }

    #[test]
    fn test_sort_puts_parents_first() {
        let now = Instant::now();
        let a = event_at(1, 1, &[], now);
        let b = event_at(2, 1, &[&a], now);
        let c = event_at(1, 2, &[&b], now);

        let mut events = vec![c.clone(), a.clone(), b.clone()];
        sort_for_sending(&mut events);

        assert_eq!(events, vec![a, b, c], "generation order");
    }

    #[test]
    fn test_filter_keeps_self_events_and_their_ancestors() {
        let now = Instant::now();
        let self_id = NodeId::new(1);

        let other_parent = event_at(2, 1, &[], now);
        let unrelated = event_at(3, 1, &[], now);
        let mine = event_at(1, 1, &[&other_parent], now);

        let filtered = filter_likely_duplicates(
            self_id,
            Duration::from_secs(3),
            now,
            vec![other_parent.clone(), unrelated, mine.clone()],
        );

        assert_eq!(filtered, vec![other_parent, mine], "young unrelated event withheld");
    }

    #[test]
    fn test_filter_releases_old_events() {
        let received = Instant::now();
        let threshold = Duration::from_secs(3);
        let young = event_at(2, 1, &[], received);

        let kept_young = filter_likely_duplicates(
            NodeId::new(1),
            threshold,
            received + Duration::from_secs(1),
            vec![young.clone()],
        );
        assert!(kept_young.is_empty(), "below the threshold");

        let kept_old = filter_likely_duplicates(
            NodeId::new(1),
            threshold,
            received + Duration::from_secs(4),
            vec![young.clone()],
        );
        assert_eq!(kept_old, vec![young], "above the threshold");
    }
}

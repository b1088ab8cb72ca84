//! Reordering behaviour of the store and the service.
//!
//! Priorities of the active goods in a group must stay dense (`1..=N`) after
//! every reorder, the moved good must land on its (clamped) target, and the
//! relative order of the other goods must be preserved.

mod common;

use std::sync::Arc;

use proptest::prelude::*;
use rstest::rstest;

use goods_manager::application::GoodError;
use goods_manager::domain::{GoodId, GroupId, PriorityChange, ValidationError};
use goods_manager::infrastructure::{GoodStore, InMemoryGoodStore, TxContext};

use common::{ordering_of, recording_harness, seed};

fn group() -> GroupId {
    GroupId::new(7)
}

fn owned(pairs: &[(&str, i32)]) -> Vec<(String, i32)> {
    pairs
        .iter()
        .map(|(name, priority)| ((*name).to_string(), *priority))
        .collect()
}

// =============================================================================
// Concrete scenarios
// =============================================================================

#[rstest]
#[tokio::test]
async fn moving_to_the_top_shifts_everything_below() {
    let harness = recording_harness();
    // Creation order gives B:1, C:2, A:3, D:4.
    let goods = seed(&harness.store, group(), &["B", "C", "A", "D"]).await;
    let (b, c, a, d) = (goods[0].id, goods[1].id, goods[2].id, goods[3].id);

    let reordering = harness.service.reprioritize(group(), a, 1).await.unwrap();

    assert_eq!(reordering.id, a);
    assert_eq!(reordering.priority, 1);
    assert_eq!(
        reordering.shifted,
        vec![
            PriorityChange::new(b, 2),
            PriorityChange::new(c, 3),
            PriorityChange::new(d, 4),
        ]
    );
    assert_eq!(
        ordering_of(&harness.store, group()).await,
        owned(&[("A", 1), ("B", 2), ("C", 3), ("D", 4)])
    );
}

#[rstest]
#[tokio::test]
async fn moving_down_closes_the_gap_above() {
    let harness = recording_harness();
    let goods = seed(&harness.store, group(), &["A", "B", "C", "D"]).await;

    let reordering = harness
        .service
        .reprioritize(group(), goods[0].id, 3)
        .await
        .unwrap();

    assert_eq!(reordering.priority, 3);
    assert_eq!(
        ordering_of(&harness.store, group()).await,
        owned(&[("B", 1), ("C", 2), ("A", 3), ("D", 4)])
    );
}

#[rstest]
#[case(5)]
#[case(99)]
#[case(i32::MAX)]
#[tokio::test]
async fn target_beyond_the_end_appends_without_gap(#[case] requested: i32) {
    let harness = recording_harness();
    let goods = seed(&harness.store, group(), &["A", "B", "C", "D"]).await;

    let reordering = harness
        .service
        .reprioritize(group(), goods[1].id, requested)
        .await
        .unwrap();

    assert_eq!(reordering.priority, 4);
    assert_eq!(
        ordering_of(&harness.store, group()).await,
        owned(&[("A", 1), ("C", 2), ("D", 3), ("B", 4)])
    );
}

#[rstest]
#[tokio::test]
async fn same_position_changes_nothing() {
    let harness = recording_harness();
    let goods = seed(&harness.store, group(), &["A", "B", "C"]).await;

    let reordering = harness
        .service
        .reprioritize(group(), goods[1].id, 2)
        .await
        .unwrap();

    assert_eq!(reordering.priority, 2);
    assert_eq!(
        ordering_of(&harness.store, group()).await,
        owned(&[("A", 1), ("B", 2), ("C", 3)])
    );
}

#[rstest]
#[tokio::test]
async fn other_groups_are_untouched() {
    let harness = recording_harness();
    let goods = seed(&harness.store, group(), &["A", "B"]).await;
    seed(&harness.store, GroupId::new(8), &["X", "Y"]).await;

    harness
        .service
        .reprioritize(group(), goods[1].id, 1)
        .await
        .unwrap();

    assert_eq!(
        ordering_of(&harness.store, GroupId::new(8)).await,
        owned(&[("X", 1), ("Y", 2)])
    );
}

#[rstest]
#[tokio::test]
async fn removed_goods_are_frozen_and_excluded() {
    let harness = recording_harness();
    let goods = seed(&harness.store, group(), &["A", "B", "C", "D"]).await;

    let removed = harness.service.delete(group(), goods[1].id).await.unwrap();
    assert!(removed.removed);
    assert_eq!(removed.priority, 2);
    assert_eq!(
        ordering_of(&harness.store, group()).await,
        owned(&[("A", 1), ("C", 2), ("D", 3)])
    );

    harness
        .service
        .reprioritize(group(), goods[3].id, 1)
        .await
        .unwrap();
    assert_eq!(
        ordering_of(&harness.store, group()).await,
        owned(&[("D", 1), ("A", 2), ("C", 3)])
    );

    let frozen = harness.service.get(goods[1].id).await.unwrap();
    assert_eq!(frozen.priority, 2);

    let result = harness.service.reprioritize(group(), goods[1].id, 1).await;
    assert_eq!(result, Err(GoodError::NotFound(goods[1].id)));
}

#[rstest]
#[tokio::test]
async fn created_goods_append_after_reorder() {
    let harness = recording_harness();
    let goods = seed(&harness.store, group(), &["A", "B", "C"]).await;
    harness
        .service
        .reprioritize(group(), goods[2].id, 1)
        .await
        .unwrap();

    let appended = seed(&harness.store, group(), &["D"]).await;

    assert_eq!(appended[0].priority, 4);
}

#[rstest]
#[case(0)]
#[case(-1)]
#[tokio::test]
async fn non_positive_target_is_rejected_before_the_store(#[case] requested: i32) {
    let harness = recording_harness();
    let goods = seed(&harness.store, group(), &["A", "B"]).await;

    let result = harness
        .service
        .reprioritize(group(), goods[0].id, requested)
        .await;

    assert_eq!(
        result,
        Err(GoodError::Validation(ValidationError::NonPositivePriority(
            requested
        )))
    );
    assert_eq!(
        ordering_of(&harness.store, group()).await,
        owned(&[("A", 1), ("B", 2)])
    );
}

#[rstest]
#[tokio::test]
async fn unknown_good_is_not_found() {
    let harness = recording_harness();

    let result = harness
        .service
        .reprioritize(group(), GoodId::new(404), 1)
        .await;

    assert_eq!(result, Err(GoodError::NotFound(GoodId::new(404))));
}

#[rstest]
#[tokio::test]
async fn reprioritize_publishes_no_event() {
    let harness = recording_harness();
    let goods = seed(&harness.store, group(), &["A", "B"]).await;

    harness
        .service
        .reprioritize(group(), goods[1].id, 1)
        .await
        .unwrap();

    assert!(harness.publisher.events().await.is_empty());
}

// =============================================================================
// Concurrency
// =============================================================================

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_disjoint_moves_keep_both_updates() {
    for _ in 0..25 {
        let harness = recording_harness();
        let goods = seed(&harness.store, group(), &["A", "B", "C", "D", "E", "F"]).await;
        let (c, e) = (goods[2].id, goods[4].id);

        let first = {
            let service = harness.service.clone();
            tokio::spawn(async move { service.reprioritize(group(), c, 1).await })
        };
        let second = {
            let service = harness.service.clone();
            tokio::spawn(async move { service.reprioritize(group(), e, 6).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let ordering = ordering_of(&harness.store, group()).await;
        let priorities: Vec<i32> = ordering.iter().map(|(_, priority)| *priority).collect();
        assert_eq!(priorities, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(ordering[0].0, "C");
        assert_eq!(ordering[5].0, "E");
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_moves_stay_dense() {
    let harness = recording_harness();
    let goods = seed(
        &harness.store,
        group(),
        &["A", "B", "C", "D", "E", "F", "G", "H"],
    )
    .await;

    let handles: Vec<_> = goods
        .iter()
        .enumerate()
        .map(|(index, good)| {
            let service = harness.service.clone();
            let id = good.id;
            let target = i32::try_from(goods.len() - index).unwrap();
            tokio::spawn(async move { service.reprioritize(group(), id, target).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let priorities: Vec<i32> = ordering_of(&harness.store, group())
        .await
        .iter()
        .map(|(_, priority)| *priority)
        .collect();
    assert_eq!(priorities, (1..=8).collect::<Vec<_>>());
}

/// Deterministic generator so that a failing round replays.
struct Lcg(u64);

impl Lcg {
    fn below(&mut self, bound: usize) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        usize::try_from(self.0 >> 33).unwrap() % bound
    }
}

/// Seeds `size` goods, then concurrently moves `movers` distinct goods to
/// random targets and removes one more good, all through detached store
/// calls. Returns the final priorities of the group.
async fn race_writers(
    store: &Arc<InMemoryGoodStore>,
    rng: &mut Lcg,
    size: usize,
    movers: usize,
) -> Vec<i32> {
    let names: Vec<String> = (0..size).map(|position| format!("g{position}")).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut ids: Vec<GoodId> = seed(store, group(), &names)
        .await
        .iter()
        .map(|good| good.id)
        .collect();

    let mut handles = Vec::with_capacity(movers);
    for _ in 0..movers {
        let id = ids.swap_remove(rng.below(ids.len()));
        let target = i32::try_from(rng.below(size + 2) + 1).unwrap();
        let store = Arc::clone(store);
        handles.push(tokio::spawn(async move {
            store
                .reprioritize(&mut TxContext::detached(), group(), id, target)
                .await
                .map(|_| ())
        }));
    }
    let victim = ids[rng.below(ids.len())];
    let remover = {
        let store = Arc::clone(store);
        tokio::spawn(async move {
            store
                .soft_delete(&mut TxContext::detached(), group(), victim)
                .await
                .map(|_| ())
        })
    };

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    remover.await.unwrap().unwrap();

    ordering_of(store, group())
        .await
        .into_iter()
        .map(|(_, priority)| priority)
        .collect()
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn randomized_concurrent_writers_keep_the_group_dense() {
    let mut rng = Lcg(0x5EED);
    for _ in 0..40 {
        let store = Arc::new(InMemoryGoodStore::new());

        let priorities = race_writers(&store, &mut rng, 8, 5).await;

        assert_eq!(priorities, (1..=7).collect::<Vec<_>>());
    }
}

#[rstest]
#[tokio::test]
async fn without_group_locks_concurrent_writers_lose_updates() {
    let mut rng = Lcg(0x5EED);
    let mut broken = 0;
    for _ in 0..40 {
        let store = Arc::new(InMemoryGoodStore::without_group_locks());

        let priorities = race_writers(&store, &mut rng, 8, 5).await;

        if priorities != (1..=7).collect::<Vec<_>>() {
            broken += 1;
        }
    }
    assert!(broken > 0);
}

// =============================================================================
// Properties
// =============================================================================

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reorder_keeps_ordering_dense(count in 1usize..12, index in 0usize..12, target in 1i32..16) {
        let index = index % count;
        let outcome = runtime().block_on(async {
            let store = Arc::new(InMemoryGoodStore::new());
            let names: Vec<String> = (0..count).map(|position| format!("g{position}")).collect();
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let goods = seed(&store, group(), &names).await;

            let reordering = store
                .reprioritize(&mut TxContext::detached(), group(), goods[index].id, target)
                .await
                .unwrap();
            let after = ordering_of(&store, group()).await;
            (goods, reordering, after)
        });
        let (goods, reordering, after) = outcome;
        let expected_target = target.min(i32::try_from(count).unwrap());

        // Dense, no duplicates.
        let priorities: Vec<i32> = after.iter().map(|(_, priority)| *priority).collect();
        prop_assert_eq!(priorities, (1..=i32::try_from(count).unwrap()).collect::<Vec<_>>());

        // The moved good sits on its target.
        let moved_name = &goods[index].name;
        let moved = after.iter().find(|(name, _)| name == moved_name).unwrap();
        prop_assert_eq!(moved.1, expected_target);
        prop_assert_eq!(reordering.priority, expected_target);

        // Everyone else keeps their relative order.
        let others: Vec<&String> = after
            .iter()
            .map(|(name, _)| name)
            .filter(|name| *name != moved_name)
            .collect();
        let original: Vec<&String> = goods
            .iter()
            .map(|good| &good.name)
            .filter(|name| *name != moved_name)
            .collect();
        prop_assert_eq!(others, original);

        // The shifted set reports final priorities of the reorder window.
        for change in &reordering.shifted {
            let good = goods.iter().find(|good| good.id == change.id).unwrap();
            let now = after.iter().find(|(name, _)| *name == good.name).unwrap();
            prop_assert_eq!(now.1, change.priority);
        }
    }
}

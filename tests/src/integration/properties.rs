//! # Delivery Guarantees
//!
//! Properties every bus must hold regardless of subscriber population:
//!
//! - **Fan-out**: each matching subscription receives exactly one copy
//! - **Isolation**: a full queue never blocks delivery to others
//! - **Filter exclusion**: non-matching events never reach a stream
//! - **Cleanup idempotence**: `unsubscribe` succeeds once
//! - **Reclamation**: idle subscriptions are reaped after two intervals

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use change_bus::{
        BusConfig, ChangeBus, ChangeEvent, EventKind, EventStream, FilterCriteria, Interest,
    };
    use proptest::prelude::*;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    async fn running_bus(config: BusConfig) -> ChangeBus {
        let bus = ChangeBus::with_config(config).unwrap();
        bus.start().await;
        bus
    }

    fn drain(stream: &mut EventStream) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = stream.try_recv() {
            events.push(event.as_ref().clone());
        }
        events
    }

    // =============================================================================
    // FAN-OUT
    // =============================================================================

    /// A subscription registered under every kind bucket still receives each
    /// event once.
    #[tokio::test]
    async fn test_no_duplicates_across_buckets() {
        let bus = running_bus(BusConfig::default()).await;
        let (_all_kinds, mut every_bucket) =
            bus.subscribe(Interest::kinds(EventKind::ALL), FilterCriteria::any());
        let (_global, mut global) = bus.subscribe_all();

        for kind in EventKind::ALL {
            assert_eq!(bus.publish(ChangeEvent::new(kind)), 2);
        }

        let received: Vec<EventKind> = drain(&mut every_bucket).iter().map(ChangeEvent::kind).collect();
        assert_eq!(received, EventKind::ALL.to_vec());
        assert_eq!(drain(&mut global).len(), EventKind::ALL.len());
    }

    /// Every matching subscriber gets the event; non-matching ones do not.
    #[tokio::test]
    async fn test_fan_out_to_matching_population() {
        let bus = running_bus(BusConfig::default()).await;
        let mut matching: Vec<EventStream> = (0..10)
            .map(|_| bus.subscribe(Interest::only(EventKind::Updated), FilterCriteria::any()).1)
            .collect();
        let mut other: Vec<EventStream> = (0..5)
            .map(|_| bus.subscribe(Interest::only(EventKind::Deleted), FilterCriteria::any()).1)
            .collect();

        let event = ChangeEvent::new(EventKind::Updated);
        let event_id = event.id();
        assert_eq!(bus.publish(event), 10);

        for stream in &mut matching {
            let events = drain(stream);
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].id(), event_id);
        }
        for stream in &mut other {
            assert!(drain(stream).is_empty());
        }
    }

    // =============================================================================
    // ISOLATION
    // =============================================================================

    #[tokio::test]
    async fn test_full_queue_does_not_block_others() {
        let bus = running_bus(BusConfig::default().with_max_queue_size(2)).await;
        let (_slow, slow) = bus.subscribe_all();
        let (_fast, mut fast) = bus.subscribe_all();

        let mut received = 0;
        for i in 0..10 {
            bus.publish(ChangeEvent::new(EventKind::Created).with_attribute("n", i));
            received += drain(&mut fast).len();
        }

        assert_eq!(received, 10);
        assert_eq!(slow.missed(), 8);
        assert_eq!(fast.missed(), 0);
        assert_eq!(bus.stats().events_dropped, 8);
    }

    // =============================================================================
    // CLEANUP
    // =============================================================================

    #[tokio::test]
    async fn test_unsubscribe_true_then_false() {
        let bus = running_bus(BusConfig::default()).await;
        let (id, mut stream) = bus.subscribe_all();

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        for _ in 0..3 {
            assert_eq!(bus.publish(ChangeEvent::new(EventKind::Created)), 0);
        }
        assert!(stream.recv().await.is_none());
        assert_eq!(bus.stats().subscriptions_cleaned, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_subscription_reclaimed() {
        let interval = Duration::from_secs(60);
        let bus = running_bus(BusConfig::default().with_cleanup_interval(interval)).await;
        let (busy_id, mut busy) =
            bus.subscribe(Interest::only(EventKind::Updated), FilterCriteria::any());
        let (idle_id, mut idle) =
            bus.subscribe(Interest::only(EventKind::Deleted), FilterCriteria::any());

        for _ in 0..4 {
            tokio::time::sleep(interval).await;
            bus.publish(ChangeEvent::new(EventKind::Updated));
            busy.recv().await.unwrap();
        }

        // idle crossed 2x interval before the pass at t=180s
        assert!(bus.subscription(idle_id).is_none());
        assert!(idle.recv().await.is_none());
        assert!(bus.subscription(busy_id).is_some());

        let stats = bus.stats();
        assert_eq!(stats.subscriptions_cleaned, 1);
        assert_eq!(stats.active_subscriptions, 1);
        bus.stop().await;
    }

    // =============================================================================
    // FILTER EXCLUSION (proptest)
    // =============================================================================

    const ENTITIES: [&str; 3] = ["a", "b", "c"];
    const USERS: [&str; 2] = ["alice", "bob"];

    fn kind_strategy() -> impl Strategy<Value = EventKind> {
        prop::sample::select(EventKind::ALL.to_vec())
    }

    fn event_strategy() -> impl Strategy<Value = ChangeEvent> {
        (
            kind_strategy(),
            prop::sample::select(ENTITIES.to_vec()),
            prop::option::of(prop::sample::select(USERS.to_vec())),
            prop::option::of(prop::sample::select(vec!["eu", "us"])),
        )
            .prop_map(|(kind, entity, user, region)| {
                let mut event = ChangeEvent::new(kind).with_entity_id(entity);
                if let Some(user) = user {
                    event = event.with_triggered_by(user);
                }
                if let Some(region) = region {
                    event = event.with_attribute("region", region);
                }
                event
            })
    }

    fn criteria_strategy() -> impl Strategy<Value = FilterCriteria> {
        (
            prop::option::of(prop::collection::hash_set(kind_strategy(), 0..4)),
            prop::option::of(prop::collection::hash_set(
                prop::sample::select(ENTITIES.to_vec()),
                0..3,
            )),
            prop::option::of(prop::sample::select(USERS.to_vec())),
            prop::option::of(prop::sample::select(vec!["eu", "us"])),
        )
            .prop_map(|(kinds, entities, user, region)| {
                let mut criteria = FilterCriteria::any();
                if let Some(kinds) = kinds {
                    criteria = criteria.with_kinds(kinds);
                }
                if let Some(entities) = entities {
                    criteria = criteria.with_entity_ids(entities);
                }
                if let Some(user) = user {
                    criteria = criteria.with_triggered_by(user);
                }
                if let Some(region) = region {
                    criteria = criteria.with_attribute("region", region);
                }
                criteria
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// A stream yields exactly the published events its criteria and
        /// interest accept, in publish order.
        #[test]
        fn prop_stream_contains_only_matching_events(
            criteria in criteria_strategy(),
            interest_kinds in prop::option::of(prop::collection::btree_set(kind_strategy(), 0..3)),
            events in prop::collection::vec(event_strategy(), 0..40),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let bus = runtime.block_on(running_bus(BusConfig::default()));

            let interest = match interest_kinds {
                Some(kinds) => Interest::Kinds(kinds),
                None => Interest::All,
            };
            let (_id, mut stream) = bus.subscribe(interest.clone(), criteria.clone());

            let mut expected = Vec::new();
            let mut delivered_total = 0;
            for event in events {
                if interest.includes(event.kind()) && criteria.matches(&event) {
                    expected.push(event.id());
                }
                delivered_total += bus.publish(event);
            }

            let received = drain(&mut stream);
            prop_assert!(received.iter().all(|event| criteria.matches(event)));
            prop_assert_eq!(received.iter().map(ChangeEvent::id).collect::<Vec<_>>(), expected);
            prop_assert_eq!(delivered_total, received.len());

            runtime.block_on(bus.stop());
        }

        /// Every subscriber in a random population sees each matching event
        /// exactly once.
        #[test]
        fn prop_fan_out_exactly_once(
            populations in prop::collection::vec(prop::option::of(kind_strategy()), 1..12),
            events in prop::collection::vec(kind_strategy(), 1..20),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let bus = runtime.block_on(running_bus(BusConfig::default()));

            let mut streams: Vec<(Interest, EventStream)> = populations
                .into_iter()
                .map(|kind| {
                    let interest = kind.map_or(Interest::All, Interest::only);
                    let (_, stream) = bus.subscribe(interest.clone(), FilterCriteria::any());
                    (interest, stream)
                })
                .collect();

            let mut ids = Vec::new();
            for kind in &events {
                let event = ChangeEvent::new(*kind);
                ids.push((event.id(), *kind));
                let expected = streams.iter().filter(|(i, _)| i.includes(*kind)).count();
                prop_assert_eq!(bus.publish(event), expected);
            }

            for (interest, stream) in &mut streams {
                let mut counts: HashMap<_, usize> = HashMap::new();
                for event in drain(stream) {
                    *counts.entry(event.id()).or_default() += 1;
                }
                for (id, kind) in &ids {
                    let want = usize::from(interest.includes(*kind));
                    prop_assert_eq!(counts.get(id).copied().unwrap_or(0), want);
                }
            }

            runtime.block_on(bus.stop());
        }
    }
}

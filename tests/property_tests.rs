//! Property-based tests for command ordering, emergency preemption and
//! session statistics.

use proptest::prelude::*;
use stroke_rs::command::{Command, CommandAction, CommandStream};
use stroke_rs::session::SessionStatisticsTracker;

const ACTIONS: [CommandAction; 14] = [
    CommandAction::ResetDevice,
    CommandAction::StopPlay,
    CommandAction::StartPlay,
    CommandAction::ConfirmStart,
    CommandAction::EnterSetup,
    CommandAction::HoldPosition,
    CommandAction::TriggerHoming,
    CommandAction::SetSafetyBounds,
    CommandAction::SetPattern,
    CommandAction::SetParameter,
    CommandAction::StreamInParameter,
    CommandAction::GetParameter,
    CommandAction::StreamOutParameter,
    CommandAction::EnterConfiguration,
];

prop_compose! {
    fn arbitrary_action()(index in 0..ACTIONS.len()) -> CommandAction {
        ACTIONS[index]
    }
}

proptest! {
    #[test]
    fn dequeue_order_is_class_then_arrival(actions in prop::collection::vec(arbitrary_action(), 0..64)) {
        let stream = CommandStream::new();
        for (i, action) in actions.iter().enumerate() {
            stream.enqueue(Command::bare(i.to_string(), *action));
        }

        let mut drained = Vec::new();
        while let Some(command) = stream.get_next() {
            let arrival: usize = command.id.parse().unwrap();
            drained.push((command.priority_class(), arrival));
        }
        prop_assert_eq!(drained.len(), actions.len());

        let mut expected = drained.clone();
        expected.sort();
        prop_assert_eq!(drained, expected);
        prop_assert!(stream.get_next().is_none());
    }

    #[test]
    fn emergency_leaves_only_itself(
        before in prop::collection::vec(arbitrary_action(), 0..64),
        after in prop::collection::vec(arbitrary_action(), 0..16),
    ) {
        let stream = CommandStream::new();
        for (i, action) in before.iter().enumerate() {
            stream.enqueue(Command::bare(format!("b{}", i), *action));
        }
        stream.enqueue(Command::bare("estop", CommandAction::EmergencyStop));
        prop_assert_eq!(stream.len(), 1);

        for (i, action) in after.iter().enumerate() {
            stream.enqueue(Command::bare(format!("a{}", i), *action));
        }
        let first = stream.get_next().unwrap();
        prop_assert_eq!(first.action, CommandAction::EmergencyStop);
        while let Some(command) = stream.get_next() {
            prop_assert!(command.id.starts_with('a'));
        }
    }

    #[test]
    fn statistics_never_decrease(feedback in prop::collection::vec((-8000i32..=0, -8000i32..=0), 1..200)) {
        let mut tracker = SessionStatisticsTracker::new(20.0);
        let mut previous = tracker.statistics();
        for (current, target) in feedback {
            tracker.update(current, target);
            let stats = tracker.statistics();
            prop_assert!(stats.strokes_total >= previous.strokes_total);
            prop_assert!(stats.distance_in_millimeters >= previous.distance_in_millimeters);
            previous = stats;
        }
        tracker.reset();
        prop_assert_eq!(tracker.statistics().strokes_total, 0);
        prop_assert_eq!(tracker.statistics().distance_in_millimeters, 0.0);
    }

    #[test]
    fn distance_matches_sum_of_deltas(positions in prop::collection::vec(-8000i32..=0, 1..100)) {
        let mut tracker = SessionStatisticsTracker::new(20.0);
        for position in &positions {
            tracker.update(*position, 0);
        }
        let steps: i64 = positions.windows(2).map(|w| (w[1] as i64 - w[0] as i64).abs()).sum();
        let expected = steps as f64 / 20.0;
        prop_assert!((tracker.statistics().distance_in_millimeters - expected).abs() < 1e-6);
    }
}

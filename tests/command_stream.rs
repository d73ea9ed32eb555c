// Integration tests for the shared command stream

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use stroke_rs::command::{Command, CommandAction, CommandPayload, CommandStream, ParameterKind};

    fn set_speed(id: String) -> Command {
        Command::new(id, CommandAction::SetParameter, CommandPayload::new(ParameterKind::Speed, 10.0))
    }

    #[test]
    fn test_mixed_classes_drain_in_priority_order() {
        let stream = CommandStream::new();
        stream.enqueue(Command::bare("telemetry", CommandAction::StreamOutParameter));
        stream.enqueue(set_speed("param".into()));
        stream.enqueue(Command::bare("bounds", CommandAction::SetSafetyBounds));
        stream.enqueue(Command::bare("hold", CommandAction::HoldPosition));
        stream.enqueue(Command::bare("get", CommandAction::GetParameter));
        stream.enqueue(Command::bare("stop", CommandAction::StopPlay));

        let ids: Vec<String> = std::iter::from_fn(|| stream.get_next()).map(|c| c.id).collect();
        assert_eq!(ids, vec!["stop", "hold", "bounds", "param", "get", "telemetry"]);
    }

    #[test]
    fn test_in_flight_snapshot_follows_consumer() {
        let stream = CommandStream::new();
        stream.enqueue(Command::bare("a", CommandAction::StopPlay));
        stream.enqueue(Command::bare("b", CommandAction::HoldPosition));
        assert!(stream.current().is_none());

        stream.get_next().unwrap();
        assert_eq!(stream.current().unwrap().id, "a");
        stream.get_next().unwrap();
        assert_eq!(stream.current().unwrap().action, CommandAction::HoldPosition);
        stream.finish_current();
        assert!(stream.current().is_none());
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        const PRODUCERS: usize = 6;
        const PER_PRODUCER: usize = 300;

        let stream = CommandStream::new();
        let barrier = Arc::new(Barrier::new(PRODUCERS));
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let stream = stream.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..PER_PRODUCER {
                        stream.enqueue(set_speed(format!("{}:{}", p, i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stream.len(), PRODUCERS * PER_PRODUCER);

        let mut last_seen = vec![None::<usize>; PRODUCERS];
        while let Some(command) = stream.get_next() {
            let (p, i) = command.id.split_once(':').unwrap();
            let (p, i): (usize, usize) = (p.parse().unwrap(), i.parse().unwrap());
            if let Some(prev) = last_seen[p] {
                assert!(i > prev, "producer {} out of order: {} after {}", p, i, prev);
            }
            last_seen[p] = Some(i);
        }
        assert!(last_seen.iter().all(|seen| *seen == Some(PER_PRODUCER - 1)));
    }

    #[test]
    fn test_emergency_wins_against_concurrent_producers() {
        let stream = CommandStream::new();
        let barrier = Arc::new(Barrier::new(5));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let stream = stream.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..500 {
                        stream.enqueue(Command::bare(format!("{}-{}", p, i), CommandAction::StopPlay));
                    }
                })
            })
            .collect();

        barrier.wait();
        stream.enqueue(Command::bare("estop", CommandAction::EmergencyStop));
        // Whatever raced in after the clear sits behind the emergency command.
        let first = stream.get_next().unwrap();
        assert_eq!(first.action, CommandAction::EmergencyStop);
        assert_eq!(first.id, "estop");

        for handle in producers {
            handle.join().unwrap();
        }
        while let Some(command) = stream.get_next() {
            assert_eq!(command.action, CommandAction::StopPlay);
        }
    }

    #[test]
    fn test_emergency_discards_everything_previously_pending() {
        let stream = CommandStream::new();
        for i in 0..50 {
            stream.enqueue(set_speed(format!("p{}", i)));
            stream.enqueue(Command::bare(format!("s{}", i), CommandAction::ResetDevice));
        }
        stream.enqueue(Command::bare("estop", CommandAction::EmergencyStop));
        assert_eq!(stream.len(), 1);
        assert_eq!(stream.get_next().unwrap().id, "estop");
        assert!(stream.get_next().is_none());
    }
}

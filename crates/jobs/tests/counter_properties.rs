//! Job 카운터 불변식 속성 테스트

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use modscan_jobs::{Eta, Job, JobState, TaskOutcome};

#[derive(Debug, Clone)]
enum Op {
    Start,
    Finish(TaskOutcome),
    Cancel,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Start),
        1 => Just(Op::Finish(TaskOutcome::Skipped)),
        1 => Just(Op::Finish(TaskOutcome::Failed)),
        1 => Just(Op::Finish(TaskOutcome::Errored)),
        2 => Just(Op::Finish(TaskOutcome::Succeeded)),
        1 => Just(Op::Cancel),
    ]
}

proptest! {
    #[test]
    fn counters_hold_after_every_update(
        enqueued in 0u64..20,
        ops in prop::collection::vec(op(), 0..80),
        elapsed_minutes in 1i64..600,
    ) {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut job = Job::new("prop", start, "/vulncheck/enqueue");
        job.record_enqueued(enqueued);

        for op in ops {
            let before = job.clone();
            let result = match op {
                Op::Start => job.record_start(),
                Op::Finish(outcome) => job.record_finish(outcome),
                Op::Cancel => {
                    job.cancel();
                    Ok(())
                }
            };
            if result.is_err() {
                prop_assert_eq!(&job, &before);
            }
            prop_assert!(job.num_started <= job.num_enqueued);
            prop_assert!(job.num_finished() <= job.num_started);
        }

        let now = start + Duration::minutes(elapsed_minutes);
        if job.num_finished() >= job.num_enqueued {
            prop_assert_eq!(job.eta(now), Eta::Done);
        }
        if job.num_finished() == 0 && !job.canceled && job.num_enqueued > 0 {
            prop_assert_eq!(job.eta(now), Eta::Unknown);
        }
        if job.state() == JobState::Finished {
            prop_assert_eq!(job.num_finished(), job.num_enqueued);
        }
    }
}

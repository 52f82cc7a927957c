use campus_scheduler::TaskState;

#[test]
fn test_valid_transitions() {
    let s = TaskState::Queued;
    let s = s.mark_as_in_flight().unwrap();
    assert_eq!(s, TaskState::InFlight { attempt: 1 });
    let s = s.mark_as_retrying().unwrap();
    assert_eq!(s, TaskState::InFlight { attempt: 2 });
    let s = s.mark_as_completed().unwrap();
    assert_eq!(s, TaskState::Completed);
    assert!(s.is_terminal());
}

#[test]
fn test_cleared_task_completes_from_queue() {
    let s = TaskState::Queued;
    assert_eq!(s.mark_as_completed().unwrap(), TaskState::Completed);
}

#[test]
fn test_invalid_transitions() {
    assert!(TaskState::Queued.mark_as_retrying().is_err());
    assert!(TaskState::InFlight { attempt: 1 }.mark_as_in_flight().is_err());
    assert!(TaskState::Completed.mark_as_in_flight().is_err());
    assert!(TaskState::Completed.mark_as_completed().is_err());

    let err = TaskState::Completed.mark_as_retrying().unwrap_err();
    assert_eq!(
        err.to_string(),
        "illegal task transition from Completed to InFlight"
    );
}

#[test]
fn test_attempt_counter() {
    assert_eq!(TaskState::Queued.attempt(), 0);
    assert_eq!(TaskState::InFlight { attempt: 3 }.attempt(), 3);
    assert_eq!(TaskState::Completed.attempt(), 0);
    assert_eq!(
        TaskState::InFlight { attempt: 2 }.to_string(),
        "InFlight(attempt=2)"
    );
}

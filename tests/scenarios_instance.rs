//! End-to-end ordering scenarios for the instance mutex, driven on the
//! deterministic lab runtime with virtual time.

mod common;

use common::{entries, new_log, push, Log};
use rwmux::lab::LabRuntime;
use rwmux::{assert_with_log, test_complete, test_phase};
use rwmux::{Cx, ErrorKind, RwMux};

fn logged(entries: &[&str]) -> Vec<String> {
    entries.iter().map(ToString::to_string).collect()
}

/// Writers serialize FIFO by arrival, not by body duration.
#[test]
fn writer_serialization() {
    common::init();
    test_phase!("writer_serialization");
    let rt = LabRuntime::new();
    let mux = RwMux::new();
    let log: Log = new_log();

    for (delay, name) in [(400_u64, "A"), (200, "B"), (0, "C")] {
        let rt_task = rt.clone();
        let mux_task = mux.clone();
        let log_task = log.clone();
        rt.spawn(async move {
            mux_task
                .exclusive(&Cx::new(), move |_scope| async move {
                    rt_task.sleep_ms(delay).await;
                    push(&log_task, name);
                    Ok(())
                })
                .await
                .expect("exclusive body");
        });
    }
    rt.run_until_idle();

    let log = entries(&log);
    assert_with_log!(log == logged(&["A", "B", "C"]), "fifo writer order", logged(&["A", "B", "C"]), log);
    assert!(mux.is_idle());
    test_complete!("writer_serialization");
}

/// Readers run as one parallel cohort; durations decide the log order.
#[test]
fn reader_parallelism() {
    common::init();
    test_phase!("reader_parallelism");
    let rt = LabRuntime::new();
    let mux = RwMux::new();
    let log: Log = new_log();

    for (delay, name) in [(400_u64, "A"), (200, "B"), (0, "C")] {
        let rt_task = rt.clone();
        let mux_task = mux.clone();
        let log_task = log.clone();
        rt.spawn(async move {
            mux_task
                .shared(&Cx::new(), move |_scope| async move {
                    rt_task.sleep_ms(delay).await;
                    push(&log_task, name);
                    Ok(())
                })
                .await
                .expect("shared body");
        });
    }
    rt.run_until_idle();

    let log = entries(&log);
    assert_with_log!(log == logged(&["C", "B", "A"]), "parallel reader order", logged(&["C", "B", "A"]), log);
    assert!(mux.is_idle());
    test_complete!("reader_parallelism");
}

/// Mixed writers and readers: coalescing and FIFO admission interleave.
#[test]
fn mixed_ordering() {
    common::init();
    test_phase!("mixed_ordering");
    let rt = LabRuntime::new();
    let mux = RwMux::new();
    let log: Log = new_log();

    let workload: [(bool, u64, &str); 6] = [
        (true, 200, "A"),
        (true, 0, "B"),
        (false, 400, "A"),
        (false, 200, "B"),
        (true, 0, "C"),
        (false, 0, "B"),
    ];
    for (exclusive, delay, name) in workload {
        let rt_task = rt.clone();
        let mux_task = mux.clone();
        let log_task = log.clone();
        rt.spawn(async move {
            let result = if exclusive {
                mux_task
                    .exclusive(&Cx::new(), move |_scope| async move {
                        rt_task.sleep_ms(delay).await;
                        push(&log_task, format!("W:{name}"));
                        Ok(())
                    })
                    .await
            } else {
                mux_task
                    .shared(&Cx::new(), move |_scope| async move {
                        rt_task.sleep_ms(delay).await;
                        push(&log_task, format!("R:{name}"));
                        Ok(())
                    })
                    .await
            };
            result.expect("body");
        });
    }
    rt.run_until_idle();

    let expected = logged(&["W:A", "W:B", "R:B", "R:A", "W:C", "R:B"]);
    let log = entries(&log);
    assert_with_log!(log == expected, "mixed admission order", expected, log);
    assert!(mux.is_idle());
    test_complete!("mixed_ordering");
}

/// A writer body awaits nested exclusive acquisitions on the same mux;
/// the nested sections run inside the outer slot, before coalesced
/// siblings.
#[test]
fn nested_writer_in_writer() {
    common::init();
    test_phase!("nested_writer_in_writer");
    let rt = LabRuntime::new();
    let mux = RwMux::new();
    let log: Log = new_log();

    for (delay, label) in [(200_u64, "A"), (0, "B")] {
        let rt_task = rt.clone();
        let mux_task = mux.clone();
        let log_task = log.clone();
        rt.spawn(async move {
            let mux_body = mux_task.clone();
            mux_task
                .exclusive(&Cx::new(), move |scope| async move {
                    push(&log_task, format!("W1:{label}"));
                    rt_task.sleep_ms(delay).await;
                    for inner in ["A", "B"] {
                        let log_inner = log_task.clone();
                        mux_body
                            .exclusive(&scope, move |_scope| async move {
                                push(&log_inner, format!("W2:{inner}"));
                                Ok(())
                            })
                            .await?;
                    }
                    Ok(())
                })
                .await
                .expect("outer writer");
        });
    }
    rt.run_until_idle();

    let expected = logged(&["W1:A", "W2:A", "W2:B", "W1:B", "W2:A", "W2:B"]);
    let log = entries(&log);
    assert_with_log!(log == expected, "re-entrant writer order", expected, log);
    assert!(mux.is_idle());
    test_complete!("nested_writer_in_writer");
}

/// An exclusive acquisition inside a shared body is escalation: the body's
/// work before the attempt still happened, the error surfaces after the
/// release, and the queue ends empty.
#[test]
fn nested_writer_in_reader_escalates() {
    common::init();
    test_phase!("nested_writer_in_reader_escalates");
    let rt = LabRuntime::new();
    let mux = RwMux::new();
    let log: Log = new_log();

    let mux_task = mux.clone();
    let log_task = log.clone();
    let outcome: std::rc::Rc<std::cell::RefCell<Option<rwmux::Error>>> = std::rc::Rc::default();
    let outcome_task = outcome.clone();
    rt.spawn(async move {
        let mux_body = mux_task.clone();
        let result = mux_task
            .shared(&Cx::new(), move |scope| async move {
                push(&log_task, "R:A");
                mux_body
                    .exclusive(&scope, move |_scope| async move { Ok(()) })
                    .await?;
                Ok(())
            })
            .await;
        *outcome_task.borrow_mut() = Some(result.expect_err("escalation must fail"));
    });
    rt.run_until_idle();

    let err = outcome.borrow_mut().take().expect("body ran");
    assert_with_log!(
        err.kind() == ErrorKind::Escalation,
        "escalation error kind",
        ErrorKind::Escalation,
        err.kind()
    );
    let log = entries(&log);
    assert_with_log!(log == logged(&["R:A"]), "log before failure", logged(&["R:A"]), log);
    assert!(mux.is_idle(), "queue returned to empty after the failure");
    test_complete!("nested_writer_in_reader_escalates");
}

//! Scheduler Lesson Tests
//!
//! LED (priority 2) and UART (priority 1) tasks over the idle task, with
//! delays, a critical section and an external interrupt.

use core_types::TaskState;
use kernel_api::{Granularity, SimulationEngine, Tick};
use sim_kernel::program::Context;
use sim_kernel::test_utils::run_ticks;
use sim_kernel::{InterruptOutcome, Scenario};
use tests_lessons::{boot, running_name, state_of, step_checked_until, task_id};

/// Test: LED runs first, sleeps until tick 4, and is selected again there
#[test]
fn test_led_boot_and_wake() {
    let mut kernel = boot(Scenario::scheduler_demo());
    assert_eq!(running_name(&kernel).as_deref(), Some("LED_Task"));
    assert_eq!(state_of(&kernel, "UART_Task"), TaskState::Ready);

    step_checked_until(&mut kernel, 20, |k| {
        state_of(k, "LED_Task") == TaskState::Blocked
    })
    .unwrap();
    let led = task_id(&kernel, "LED_Task");
    assert_eq!(kernel.tasks().get(led).unwrap().wake_tick(), Some(Tick::new(4)));

    step_checked_until(&mut kernel, 500, |k| {
        k.now() == Tick::new(4) && k.context().is_thread()
    })
    .unwrap();
    assert_eq!(running_name(&kernel).as_deref(), Some("LED_Task"));
    assert_eq!(state_of(&kernel, "UART_Task"), TaskState::Ready);
}

/// Test: UART prints the tick count every second tick, LED toggles every fourth
#[test]
fn test_observables_over_seven_ticks() {
    let mut kernel = boot(Scenario::scheduler_demo());
    run_ticks(&mut kernel, 7).unwrap();
    assert_eq!(kernel.uart_output(), "Tick: 0\nTick: 2\nTick: 4\nTick: 6\n");
    assert!(!kernel.led_on());
    assert_eq!(running_name(&kernel).as_deref(), Some("IDLE"));
}

/// Test: Raising UART above LED at boot lets it run first
#[test]
fn test_priority_change_reorders_tasks() {
    let mut kernel = boot(Scenario::scheduler_demo());
    let uart = task_id(&kernel, "UART_Task");
    kernel.set_priority(uart, 3).unwrap();
    assert_eq!(running_name(&kernel).as_deref(), Some("UART_Task"));

    let snapshot = kernel.step(Granularity::TaskInstruction).unwrap();
    assert_eq!(snapshot.interrupts.critical_nesting, 1);
}

/// Test: An interrupt raised inside UART's critical section waits for the exit
///
/// This validates that:
/// 1. The interrupt is latched, not serviced, while masked
/// 2. It is serviced on the step after the critical section ends
/// 3. The ISR requests a context switch that PendSV carries out
#[test]
fn test_interrupt_latched_until_critical_exit() {
    let mut kernel = boot(Scenario::scheduler_demo());
    step_checked_until(&mut kernel, 50, |k| k.interrupts().is_masked()).unwrap();
    assert_eq!(running_name(&kernel).as_deref(), Some("UART_Task"));

    assert_eq!(kernel.trigger_interrupt(), InterruptOutcome::Pended);
    let snapshot = kernel.snapshot();
    assert!(snapshot.interrupts.pending_interrupt);
    assert!(!snapshot.interrupts.executing_isr);

    step_checked_until(&mut kernel, 10, |k| k.interrupts().is_executing_isr()).unwrap();
    assert!(!kernel.interrupts().is_masked());
    assert!(kernel.uart_output().starts_with("Tick: 0"));

    step_checked_until(&mut kernel, 5, |k| k.context().is_thread()).unwrap();
    assert!(kernel.yield_pending());
    assert_eq!(kernel.interrupts().serviced_count(), 1);

    kernel.step(Granularity::Instruction).unwrap();
    assert!(matches!(kernel.context(), Context::Handler(_)));
    assert!(!kernel.yield_pending());
}

/// Test: Raising again after the unmask takes the latched request once
///
/// This validates that:
/// 1. The raise on the step after the critical exit starts the handler
/// 2. The latch is consumed by that start
/// 3. The handler does not run a second time for the same request
#[test]
fn test_reraise_after_critical_exit_services_once() {
    let mut kernel = boot(Scenario::scheduler_demo());
    step_checked_until(&mut kernel, 50, |k| k.interrupts().is_masked()).unwrap();
    assert_eq!(kernel.trigger_interrupt(), InterruptOutcome::Pended);

    step_checked_until(&mut kernel, 10, |k| !k.interrupts().is_masked()).unwrap();
    assert!(kernel.interrupts().is_pending());
    assert!(!kernel.interrupts().is_executing_isr());

    assert_eq!(kernel.trigger_interrupt(), InterruptOutcome::Serviced);
    assert!(!kernel.interrupts().is_pending());

    for _ in 0..12 {
        kernel.step(Granularity::Instruction).unwrap();
    }
    assert_eq!(kernel.interrupts().serviced_count(), 1);
}

/// Test: An interrupt during SysTick's masked section resumes SysTick
#[test]
fn test_interrupt_inside_systick_resumes_handler() {
    let mut kernel = boot(Scenario::scheduler_demo());
    kernel.pend_tick();
    kernel.step(Granularity::Instruction).unwrap();
    assert!(kernel.interrupts().is_masked());
    assert_eq!(kernel.trigger_interrupt(), InterruptOutcome::Pended);

    // IncrementTick, UnblockDue, UnmaskInterrupts
    for _ in 0..3 {
        kernel.step(Granularity::Instruction).unwrap();
    }
    assert_eq!(kernel.now(), Tick::new(1));

    kernel.step(Granularity::Instruction).unwrap();
    let Context::Isr { resume: Some(frame), .. } = kernel.context() else {
        panic!("expected the ISR over SysTick, got {:?}", kernel.context());
    };
    assert_eq!(frame.handler.name(), "SysTick_Handler");

    kernel.step(Granularity::Instruction).unwrap();
    assert_eq!(kernel.context(), Context::Handler(frame));
    assert!(kernel.yield_pending());
}

/// Test: Two kernels from the same scenario produce the same trace
#[test]
fn test_runs_are_deterministic() {
    let mut a = boot(Scenario::scheduler_demo());
    let mut b = boot(Scenario::scheduler_demo());
    run_ticks(&mut a, 10).unwrap();
    run_ticks(&mut b, 10).unwrap();
    assert_eq!(a.snapshot(), b.snapshot());
    let messages = |k: &sim_kernel::SimulatedKernel| {
        k.trace().events().map(|e| e.message.clone()).collect::<Vec<_>>()
    };
    assert_eq!(messages(&a), messages(&b));
}

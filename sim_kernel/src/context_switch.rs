//! PendSV context-switch walk-through
//!
//! Models the Cortex-M4 port's `xPortPendSVHandler` one instruction group at
//! a time: Task A is interrupted with its hardware frame already stacked,
//! its callee-saved registers are pushed, the kernel picks Task B, and B's
//! saved context is restored until the exception return.
//!
//! Register values are illustrative. The data movement (which words go to
//! which stack and which TCB) follows the real handler.

use crate::interrupt::InterruptController;
use kernel_api::{Granularity, KernelError, SimulationEngine};
use serde::{Deserialize, Serialize};

/// Steps 0..=13
pub const TOTAL_STEPS: usize = 14;

/// Listing line highlighted at each step (1-based)
pub const STEP_TO_LINE: [usize; TOTAL_STEPS] = [2, 3, 8, 11, 12, 14, 18, 22, 26, 28, 31, 33, 35, 37];

/// `xPortPendSVHandler` from the GCC ARM_CM4F port
pub const ASM_LISTING: [&str; 37] = [
    ".global xPortPendSVHandler",
    "xPortPendSVHandler:",
    "    mrs r0, psp",
    "    isb",
    "",
    "    ; --- 1. Get Current TCB ---",
    "    ldr r3, =pxCurrentTCB",
    "    ldr r2, [r3]",
    "",
    "    ; --- 2. Save SW Context ---",
    "    stmdb r0!, {r4-r11}",
    "    str r0, [r2]",
    "    ; --- 3. Prepare C Call ---",
    "    stmdb sp!, {r3, r14}",
    "",
    "    ; Disable Interrupts",
    "    mov r0, #configMAX_SYSCALL_INTERRUPT_PRIORITY",
    "    msr basepri, r0",
    "    dsb",
    "    isb",
    "",
    "    bl vTaskSwitchContext",
    "",
    "    ; Enable Interrupts",
    "    mov r0, #0",
    "    msr basepri, r0",
    "",
    "    ldmia sp!, {r3, r14}",
    "    ; --- 4. Restore Context ---",
    "    ldr r1, [r3]",
    "    ldr r0, [r1]",
    "",
    "    ldmia r0!, {r4-r11}",
    "",
    "    msr psp, r0",
    "    isb",
    "    bx r14",
];

const MAX_SYSCALL_INTERRUPT_PRIORITY: u32 = 0x50;
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;
/// Address of `pxCurrentTCB`
const CURRENT_TCB_PTR: u32 = 0x2000_0000;
/// Eight words
const FRAME_BYTES: u32 = 32;

/// The core registers the walk-through touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFile {
    /// r0..=r12
    pub r: [u32; 13],
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
    pub psp: u32,
    pub msp: u32,
    pub basepri: u32,
}

/// Words the hardware stacks on exception entry: r0-r3, r12, lr, pc, xPSR
type HardwareFrame = [u32; 8];
/// r4-r11 as pushed by the handler
type SoftwareFrame = [u32; 8];

#[derive(Debug, Clone, PartialEq, Eq)]
struct SavedTask {
    name: &'static str,
    tcb_addr: u32,
    /// `pxTopOfStack`, the first TCB word
    top_of_stack: u32,
    hardware: Option<HardwareFrame>,
    software: Option<SoftwareFrame>,
}

/// Snapshot of the walk-through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSwitchSnapshot {
    pub step: usize,
    pub line: usize,
    pub instruction: String,
    pub phase: String,
    pub registers: RegisterFile,
    /// Task `pxCurrentTCB` points at
    pub current_task: String,
    /// `pxTopOfStack` of Task A and Task B
    pub top_of_stack: [u32; 2],
    pub interrupts_masked: bool,
    pub switch_required: bool,
    pub kernel_context: bool,
}

#[derive(Debug, Clone)]
pub struct ContextSwitchDemo {
    step: usize,
    regs: RegisterFile,
    tasks: [SavedTask; 2],
    current: usize,
    /// Words pushed on the main stack by the handler
    main_stack: Vec<u32>,
    interrupts: InterruptController,
    switch_required: bool,
}

impl Default for ContextSwitchDemo {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextSwitchDemo {
    /// Task A just took PendSV; Task B was switched out earlier
    pub fn new() -> Self {
        let frame_a: HardwareFrame = [
            0x2000_1000,
            0x0000_0001,
            0x2000_0800,
            0x0000_0000,
            0xDEAD_BEEF,
            0x0800_1201,
            0x0800_1234,
            0x0100_0000,
        ];
        let frame_b: HardwareFrame = [
            0x2000_2000,
            0x0000_0002,
            0x2000_1800,
            0x0000_0000,
            0xCAFE_BABE,
            0x0800_5601,
            0x0800_5678,
            0x0100_0000,
        ];

        let mut r = [0u32; 13];
        r[..4].copy_from_slice(&frame_a[..4]);
        for (i, reg) in r[4..12].iter_mut().enumerate() {
            *reg = 0xA000_0004 + i as u32;
        }
        r[12] = frame_a[4];

        let software_b: SoftwareFrame = std::array::from_fn(|i| 0xB000_0004 + i as u32);

        Self {
            step: 0,
            regs: RegisterFile {
                r,
                lr: EXC_RETURN_THREAD_PSP,
                pc: frame_a[6],
                xpsr: frame_a[7],
                psp: 0x2000_0FF0,
                msp: 0x2000_FF00,
                basepri: 0,
            },
            tasks: [
                SavedTask {
                    name: "Task_A",
                    tcb_addr: 0x2000_0100,
                    top_of_stack: 0,
                    hardware: Some(frame_a),
                    software: None,
                },
                SavedTask {
                    name: "Task_B",
                    tcb_addr: 0x2000_0200,
                    top_of_stack: 0x2000_1FF0 - FRAME_BYTES,
                    hardware: Some(frame_b),
                    software: Some(software_b),
                },
            ],
            current: 0,
            main_stack: Vec::new(),
            interrupts: InterruptController::new(),
            switch_required: false,
        }
    }

    pub fn step_index(&self) -> usize {
        self.step
    }

    pub fn is_finished(&self) -> bool {
        self.step == TOTAL_STEPS - 1
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    /// Listing line for the current step
    pub fn line(&self) -> usize {
        STEP_TO_LINE[self.step]
    }

    pub fn instruction(&self) -> &'static str {
        ASM_LISTING[self.line() - 1].trim()
    }

    pub fn phase(&self) -> &'static str {
        match self.step {
            0 => "Interrupt Entry (PendSV)",
            1..=2 => "Reading PSP (Task A)",
            3..=4 => "SAVING Context (R4-R11) -> Stack A",
            5..=6 => "Saving Stack Pointer -> TCB A",
            7 => "KERNEL: Selecting Next Task",
            8..=9 => "Restoring Kernel Context",
            10 => "Loading Stack Pointer <- TCB B",
            11..=12 => "RESTORING Context (R4-R11) <- Stack B",
            _ => "Exception Return -> Task B",
        }
    }

    /// Advances one step; stays put on the last one
    pub fn advance(&mut self) {
        if self.is_finished() {
            return;
        }
        self.step += 1;
        self.execute(self.step);
    }

    /// Goes back one step by replaying from the start
    pub fn step_back(&mut self) {
        let target = self.step.saturating_sub(1);
        self.seek(target);
    }

    /// Replays up to `step` (clamped to the last one)
    pub fn seek(&mut self, step: usize) {
        *self = Self::new();
        for _ in 0..step.min(TOTAL_STEPS - 1) {
            self.advance();
        }
    }

    fn execute(&mut self, step: usize) {
        let regs = &mut self.regs;
        match step {
            // mrs r0, psp
            1 => regs.r[0] = regs.psp,
            // ldr r3, =pxCurrentTCB; ldr r2, [r3]
            2 => {
                regs.r[3] = CURRENT_TCB_PTR;
                regs.r[2] = self.tasks[self.current].tcb_addr;
            }
            // stmdb r0!, {r4-r11}
            3 => {
                let mut saved = [0u32; 8];
                saved.copy_from_slice(&regs.r[4..12]);
                self.tasks[self.current].software = Some(saved);
                regs.r[0] -= FRAME_BYTES;
            }
            // str r0, [r2]
            4 => self.tasks[self.current].top_of_stack = regs.r[0],
            // stmdb sp!, {r3, r14}
            5 => {
                self.main_stack.push(regs.r[3]);
                self.main_stack.push(regs.lr);
                regs.msp -= 8;
            }
            // msr basepri, r0
            6 => {
                regs.r[0] = MAX_SYSCALL_INTERRUPT_PRIORITY;
                regs.basepri = MAX_SYSCALL_INTERRUPT_PRIORITY;
                self.interrupts.enter_critical();
            }
            // bl vTaskSwitchContext
            7 => {
                self.current = 1 - self.current;
                self.switch_required = true;
            }
            // msr basepri, r0
            8 => {
                regs.r[0] = 0;
                regs.basepri = 0;
                self.interrupts.exit_critical();
            }
            // ldmia sp!, {r3, r14}
            9 => {
                if let Some(lr) = self.main_stack.pop() {
                    regs.lr = lr;
                }
                if let Some(r3) = self.main_stack.pop() {
                    regs.r[3] = r3;
                }
                regs.msp += 8;
            }
            // ldr r1, [r3]; ldr r0, [r1]
            10 => {
                regs.r[1] = self.tasks[self.current].tcb_addr;
                regs.r[0] = self.tasks[self.current].top_of_stack;
            }
            // ldmia r0!, {r4-r11}
            11 => {
                if let Some(saved) = self.tasks[self.current].software.take() {
                    regs.r[4..12].copy_from_slice(&saved);
                }
                regs.r[0] += FRAME_BYTES;
            }
            // msr psp, r0
            12 => regs.psp = regs.r[0],
            // bx r14: the hardware unstacks the task's frame
            13 => {
                if let Some(frame) = self.tasks[self.current].hardware.take() {
                    regs.r[..4].copy_from_slice(&frame[..4]);
                    regs.r[12] = frame[4];
                    regs.lr = frame[5];
                    regs.pc = frame[6];
                    regs.xpsr = frame[7];
                }
                regs.psp += FRAME_BYTES;
            }
            _ => {}
        }
    }
}

impl SimulationEngine for ContextSwitchDemo {
    type Snapshot = ContextSwitchSnapshot;

    fn reset(&mut self) {
        *self = Self::new();
    }

    /// Every granularity is one walk-through step
    fn step(&mut self, _granularity: Granularity) -> Result<ContextSwitchSnapshot, KernelError> {
        self.advance();
        Ok(self.snapshot())
    }

    fn snapshot(&self) -> ContextSwitchSnapshot {
        ContextSwitchSnapshot {
            step: self.step,
            line: self.line(),
            instruction: self.instruction().to_string(),
            phase: self.phase().to_string(),
            registers: self.regs,
            current_task: self.tasks[self.current].name.to_string(),
            top_of_stack: [self.tasks[0].top_of_stack, self.tasks[1].top_of_stack],
            interrupts_masked: self.interrupts.is_masked(),
            switch_required: self.switch_required,
            kernel_context: (5..=9).contains(&self.step),
        }
    }
}

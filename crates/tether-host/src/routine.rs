//! In-child shutdown routine
//!
//! Windows has no way to deliver a console control event to one arbitrary
//! process from outside. Instead a tiny, fixed x86-64 routine is written into
//! the child and started there as a thread. It raises CTRL+C inside the
//! child, sleeps, then calls `ExitProcess(0)` if the child is still alive.
//!
//! The routine runs in a foreign address space, so it must not touch any
//! supervisor memory: it takes no parameter and every address it calls is
//! patched into the code as an immediate before it is copied over. System
//! DLLs are mapped at the same base in every process of a boot session, so
//! `kernel32` addresses resolved in the supervisor are valid in the child.

/// Entry points the routine calls, as absolute addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutineImports {
    pub generate_console_ctrl_event: u64,
    pub sleep: u64,
    pub exit_process: u64,
}

const TEMPLATE: [u8; 52] = [
    0x48, 0x83, 0xEC, 0x28, // sub rsp, 0x28
    0x31, 0xC9, // xor ecx, ecx          ; CTRL_C_EVENT
    0x31, 0xD2, // xor edx, edx          ; process group 0
    0x48, 0xB8, 0, 0, 0, 0, 0, 0, 0, 0, // mov rax, GenerateConsoleCtrlEvent
    0xFF, 0xD0, // call rax
    0xB9, 0, 0, 0, 0, // mov ecx, delay_ms
    0x48, 0xB8, 0, 0, 0, 0, 0, 0, 0, 0, // mov rax, Sleep
    0xFF, 0xD0, // call rax
    0x31, 0xC9, // xor ecx, ecx          ; exit code 0
    0x48, 0xB8, 0, 0, 0, 0, 0, 0, 0, 0, // mov rax, ExitProcess
    0xFF, 0xD0, // call rax
    0xCC, // int3
];

const CTRL_EVENT_AT: usize = 10;
const DELAY_AT: usize = 21;
const SLEEP_AT: usize = 27;
const EXIT_AT: usize = 41;

/// A ready-to-copy instance of the shutdown routine
#[derive(Debug, Clone)]
pub struct ShutdownRoutine {
    code: [u8; TEMPLATE.len()],
}

impl ShutdownRoutine {
    pub fn new(imports: RoutineImports, delay_ms: u32) -> Self {
        let mut code = TEMPLATE;
        code[CTRL_EVENT_AT..CTRL_EVENT_AT + 8]
            .copy_from_slice(&imports.generate_console_ctrl_event.to_le_bytes());
        code[DELAY_AT..DELAY_AT + 4].copy_from_slice(&delay_ms.to_le_bytes());
        code[SLEEP_AT..SLEEP_AT + 8].copy_from_slice(&imports.sleep.to_le_bytes());
        code[EXIT_AT..EXIT_AT + 8].copy_from_slice(&imports.exit_process.to_le_bytes());
        Self { code }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imports() -> RoutineImports {
        RoutineImports {
            generate_console_ctrl_event: 0x1122_3344_5566_7788,
            sleep: 0x0000_7FFA_0000_1000,
            exit_process: 0x0000_7FFA_0000_2000,
        }
    }

    #[test]
    fn immediates_follow_their_opcodes() {
        // Each patched slot is preceded by its opcode bytes
        assert_eq!(&TEMPLATE[CTRL_EVENT_AT - 2..CTRL_EVENT_AT], &[0x48, 0xB8]);
        assert_eq!(TEMPLATE[DELAY_AT - 1], 0xB9);
        assert_eq!(&TEMPLATE[SLEEP_AT - 2..SLEEP_AT], &[0x48, 0xB8]);
        assert_eq!(&TEMPLATE[EXIT_AT - 2..EXIT_AT], &[0x48, 0xB8]);
    }

    #[test]
    fn patches_addresses_and_delay() {
        let routine = ShutdownRoutine::new(imports(), 4000);
        let code = routine.bytes();

        assert_eq!(
            u64::from_le_bytes(code[CTRL_EVENT_AT..CTRL_EVENT_AT + 8].try_into().unwrap()),
            0x1122_3344_5566_7788
        );
        assert_eq!(
            u32::from_le_bytes(code[DELAY_AT..DELAY_AT + 4].try_into().unwrap()),
            4000
        );
        assert_eq!(
            u64::from_le_bytes(code[SLEEP_AT..SLEEP_AT + 8].try_into().unwrap()),
            0x0000_7FFA_0000_1000
        );
        assert_eq!(
            u64::from_le_bytes(code[EXIT_AT..EXIT_AT + 8].try_into().unwrap()),
            0x0000_7FFA_0000_2000
        );
    }

    #[test]
    fn untouched_bytes_match_template() {
        let routine = ShutdownRoutine::new(imports(), 1);
        let patched = [
            CTRL_EVENT_AT..CTRL_EVENT_AT + 8,
            DELAY_AT..DELAY_AT + 4,
            SLEEP_AT..SLEEP_AT + 8,
            EXIT_AT..EXIT_AT + 8,
        ];
        for (i, (a, b)) in routine.bytes().iter().zip(TEMPLATE.iter()).enumerate() {
            if !patched.iter().any(|r| r.contains(&i)) {
                assert_eq!(a, b, "byte {i} changed");
            }
        }
        assert_eq!(*routine.bytes().last().unwrap(), 0xCC);
    }
}

//! Native stack budget of the compiler.
//!
//! The parser and the emitter recurse on the host stack. Frame sizes vary
//! between builds, so besides counting nesting levels both measure how far
//! the stack pointer has moved since compilation started and give up with a
//! syntax error before the host stack runs out.

use super::error::{ParseError, ParseResult, ERR_STACK_OVERFLOW};

/// Host stack bytes compilation may use below its entry point.
pub const JS_COMPILE_STACK_MAX: usize = 512 * 1024;

/// Nesting levels (statements, assignments, unary operands, `new`) the
/// compiler accepts.
pub const JS_COMPILE_DEPTH_MAX: u32 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct StackLimit {
    base: usize,
    depth: u32,
}

#[inline(always)]
fn stack_address() -> usize {
    let marker = 0u8;
    core::hint::black_box(&marker) as *const u8 as usize
}

impl StackLimit {
    /// Budget measured from the caller's frame.
    pub fn here() -> Self {
        Self {
            base: stack_address(),
            depth: 0,
        }
    }

    /// Enters one nesting level at source offset `pos`.
    pub fn enter(&mut self, pos: usize) -> ParseResult<()> {
        self.depth += 1;
        let used = self.base.saturating_sub(stack_address());
        if self.depth > JS_COMPILE_DEPTH_MAX || used > JS_COMPILE_STACK_MAX {
            self.depth -= 1;
            return Err(ParseError::new(ERR_STACK_OVERFLOW, pos));
        }
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth -= 1;
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn depth_is_bounded() {
        let mut limit = StackLimit::here();
        for _ in 0..JS_COMPILE_DEPTH_MAX {
            limit.enter(0).unwrap();
        }
        let err = limit.enter(7).unwrap_err();
        assert_eq!(err.message(), ERR_STACK_OVERFLOW);
        assert_eq!(err.position(), 7);
        assert_eq!(limit.depth(), JS_COMPILE_DEPTH_MAX);
        limit.leave();
        assert!(limit.enter(0).is_ok());
    }

    fn recurse(limit: &mut StackLimit, pad: [u8; 1024]) -> ParseResult<u32> {
        limit.enter(0)?;
        let res = recurse(limit, core::hint::black_box(pad));
        limit.leave();
        res.map(|n| n + 1)
    }

    #[test]
    fn host_stack_is_bounded() {
        // Runs on its own thread so the test harness stack size is known.
        let handle = std::thread::Builder::new()
            .stack_size(4 * 1024 * 1024)
            .spawn(|| {
                let mut limit = StackLimit::here();
                recurse(&mut limit, [0; 1024]).unwrap_err()
            })
            .unwrap();
        assert_eq!(handle.join().unwrap().message(), ERR_STACK_OVERFLOW);
    }
}

use log::debug;

use crate::bind::DynOptions;
use crate::commands::Command;
use crate::error::ExecError;
use crate::repl::{Context, Request, Session};

#[derive(Debug, Default)]
pub struct SeqOptions {
    pub first: i64,
    pub last: Option<i64>,
    pub step: Option<i64>,
}

crate::bind_options! {
    SeqOptions {
        first: "*=#1",
        last: "*=#2,opt",
        step: "*=s|step,opt",
    }
}

/// `seq LAST` or `seq FIRST LAST`: one value per integer, inclusive.
///
/// Stops early when the request is cancelled or the pipeline has failed,
/// which makes `seq 1 1000000000 | limit 5` cheap.
pub struct Seq;

impl Command for Seq {
    fn new_options(&self, _ctx: &Context) -> Box<dyn DynOptions> {
        Box::new(SeqOptions::default())
    }

    fn execute(&self, _session: &mut Session, req: &mut Request<'_>) -> Result<(), ExecError> {
        let opts = req.options::<SeqOptions>()?;
        let (first, last) = match opts.last {
            Some(last) => (opts.first, last),
            None => (1, opts.first),
        };
        let step = match opts.step {
            Some(0) => return Err(ExecError::failed("step must not be zero")),
            Some(step) => step,
            None if first <= last => 1,
            None => -1,
        };

        let mut current = first;
        while (step > 0 && current <= last) || (step < 0 && current >= last) {
            if req.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            let output = req.output()?;
            if output.is_closed() {
                debug!("seq: output closed at {current}");
                break;
            }
            output.write_value(None, current);
            let Some(next) = current.checked_add(step) else {
                break;
            };
            current = next;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::testing::run;

    #[test]
    fn counts_up_and_down() {
        assert_eq!(run(&["seq 3"]).0, "1\n2\n3\n");
        assert_eq!(run(&["seq 5 3"]).0, "5\n4\n3\n");
        assert_eq!(run(&["seq 0 10 -s 5"]).0, "0\n5\n10\n");
    }

    #[test]
    fn hex_bounds() {
        assert_eq!(run(&["seq 0x2 0b11"]).0, "2\n3\n");
    }

    #[test]
    fn zero_step_fails() {
        let (out, diag) = run(&["seq 1 3 --step 0"]);
        assert_eq!(out, "");
        assert!(diag.contains("seq: step must not be zero"), "{diag}");
    }

    #[test]
    fn missing_bound() {
        let (_, diag) = run(&["seq"]);
        assert!(diag.contains("missing argument #1"), "{diag}");
    }

    #[test]
    fn stops_when_downstream_is_done() {
        assert_eq!(run(&["seq 1 1000000000 | limit 2"]).0, "1\n2\n");
    }
}

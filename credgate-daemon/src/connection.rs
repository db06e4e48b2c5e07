//! Per-connection protocol state machine.
//!
//! A [`Connection`] owns everything about one client session except the
//! transport. The server feeds it whatever bytes arrive; it answers into an
//! output buffer and says whether the session should continue. No I/O
//! happens here, so the whole protocol can be driven from tests.

use std::sync::Arc;

use bytes::Buf;

use crate::context::{DaemonContext, SessionPolicy};
use crate::protocol::{
    ConnectionError, CsrFramer, OtpGenerateFramer, OtpValidateFramer, Progress, Selector,
};

/// What the transport should do after [`Connection::on_bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading.
    Continue,
    /// Flush the output and close.
    Close,
}

enum State {
    Unselected,
    OtpGenerate(OtpGenerateFramer),
    OtpValidate(OtpValidateFramer),
    CsrSign(CsrFramer),
    Finished,
}

pub struct Connection {
    ctx: Arc<DaemonContext>,
    state: State,
    completed: u64,
}

impl Connection {
    pub fn new(ctx: Arc<DaemonContext>) -> Self {
        Self {
            ctx,
            state: State::Unselected,
            completed: 0,
        }
    }

    /// The sub-protocol currently receiving bytes, if any.
    pub fn protocol(&self) -> Option<Selector> {
        match self.state {
            State::OtpGenerate(_) => Some(Selector::OtpGenerate),
            State::OtpValidate(_) => Some(Selector::OtpValidate),
            State::CsrSign(_) => Some(Selector::CsrSign),
            State::Unselected | State::Finished => None,
        }
    }

    /// Number of requests answered so far.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Process one chunk of input, appending any response to `out`.
    ///
    /// Bytes are consumed strictly in order. On error the connection is
    /// finished and must be closed; `out` may still hold responses to
    /// earlier requests from the same chunk.
    pub fn on_bytes(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<Flow, ConnectionError> {
        let result = self.drive(chunk, out);
        if result.is_err() {
            self.state = State::Finished;
        }
        result
    }

    fn drive(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<Flow, ConnectionError> {
        let mut input = chunk;

        loop {
            match &mut self.state {
                State::Finished => return Ok(Flow::Close),
                State::Unselected => {
                    if !input.has_remaining() {
                        return Ok(Flow::Continue);
                    }
                    let selector = Selector::try_from(input.get_u8())?;
                    tracing::debug!(protocol = selector.name(), "Sub-protocol selected");
                    self.state = match selector {
                        Selector::OtpGenerate => State::OtpGenerate(OtpGenerateFramer::new()),
                        Selector::OtpValidate => State::OtpValidate(OtpValidateFramer::new()),
                        Selector::CsrSign => {
                            State::CsrSign(CsrFramer::new(self.ctx.max_csr_size()))
                        }
                    };
                }
                State::OtpGenerate(framer) => match framer.feed(&mut input)? {
                    Progress::NeedMore => return Ok(Flow::Continue),
                    Progress::Complete(request) => {
                        self.ctx.generate_otp(request);
                        self.finish_request();
                    }
                },
                State::OtpValidate(framer) => match framer.feed(&mut input)? {
                    Progress::NeedMore => return Ok(Flow::Continue),
                    Progress::Complete(request) => {
                        out.extend_from_slice(self.ctx.validate_otp(&request));
                        self.finish_request();
                    }
                },
                State::CsrSign(framer) => match framer.feed(&mut input)? {
                    Progress::NeedMore => return Ok(Flow::Continue),
                    Progress::Complete(request) => {
                        self.ctx.sign_csr(&request, out);
                        self.finish_request();
                    }
                },
            }
        }
    }

    fn finish_request(&mut self) {
        self.completed += 1;
        self.state = match self.ctx.session_policy() {
            SessionPolicy::SingleRequest => State::Finished,
            SessionPolicy::KeepAlive => State::Unselected,
        };
    }
}

use core::fmt;

/// The result of running a driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Score {
    /// Payload bytes that made it to the other end.
    pub(crate) data_len: u64,
    /// Frames the stack transmitted.
    pub(crate) frame_count: u32,
    /// Successful send calls.
    pub(crate) send_count: u32,
    /// Times the engine was polled.
    pub(crate) rounds: u32,
}

impl Score {
    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn send_count(&self) -> u32 {
        self.send_count
    }

    fn total_kb(&self) -> f32 {
        self.data_len as f32 / 1024.0
    }

    fn frames_per_send(&self) -> f32 {
        if self.send_count == 0 {
            return 0.0;
        }
        self.frame_count as f32 / self.send_count as f32
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Roughly the iperf style:
        //
        // ```text
        // [  3]  9.8 KBytes   7 sends   14 frames (2.00/send)   12 rounds
        // ```
        write!(
            f,
            "[{ts:3}] {total:.1} KBytes\t{sends} sends\t{frames} frames ({ratio:.2}/send)\t{rounds} rounds",
            ts = 3,
            total = self.total_kb(),
            sends = self.send_count,
            frames = self.frame_count,
            ratio = self.frames_per_send(),
            rounds = self.rounds,
        )
    }
}

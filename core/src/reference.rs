//! Reference step engine
//!
//! A small deterministic machine implementing [`StepEngine`]. It runs a byte
//! program against 8 KiB of work RAM once per video frame, renders the RAM as
//! a 160x144 RGBA image and synthesizes a square wave whose pitch follows the
//! machine state. It exists to drive the orchestration core headlessly and in
//! tests; it does not emulate any real hardware.
//!
//! # Program format
//!
//! ```text
//! offset  size  field
//! 0       4     magic "RWPG"
//! 4       1     version (1)
//! 5       1     reserved
//! 6       2     persistent RAM size in bytes (LE)
//! 8       4     code length in bytes (LE, > 0)
//! 12      n     code
//! ```

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::engine::{Events, Snapshot, StepEngine, Ticks};
use crate::error::EngineError;
use crate::input::{Buttons, InputSource};
use crate::presentation::FRAME_BYTES;

pub const PROGRAM_MAGIC: [u8; 4] = *b"RWPG";
pub const PROGRAM_VERSION: u8 = 1;
const PROGRAM_HEADER_LEN: usize = 12;

const STATE_MAGIC: [u8; 4] = *b"RWST";
const STATE_VERSION: u8 = 1;

/// Machine cycles per second
pub const TICKS_PER_SECOND: u64 = 4_194_304;
/// Machine cycles per video frame (~59.7 Hz)
pub const FRAME_TICKS: u64 = 70_224;
/// Work RAM size in bytes
pub const WORK_RAM_SIZE: usize = 8 * 1024;
/// Program bytes executed per frame
const OPS_PER_FRAME: u32 = 16;
/// Frames between periodic persistent RAM writes
const PERSIST_EVERY_FRAMES: u64 = 60;

/// Deterministic reference implementation of [`StepEngine`].
///
/// Frames are [`SCREEN_WIDTH`](crate::presentation::SCREEN_WIDTH) x
/// [`SCREEN_HEIGHT`](crate::presentation::SCREEN_HEIGHT) RGBA.
pub struct ReferenceMachine {
    code: Vec<u8>,
    sample_rate: u32,
    audio_frames: usize,

    ticks: Ticks,
    frame_count: u64,
    pc: u32,
    acc: u8,
    work_ram: Vec<u8>,
    persistent_ram: Vec<u8>,
    samples_done: u64,
    audio_fill: usize,
    audio_buf: Vec<u8>,

    audio_out: Vec<u8>,
    frame_buffer: Vec<u8>,
    persistent_updated: bool,
}

impl ReferenceMachine {
    /// Build program bytes from code and a persistent RAM size
    pub fn assemble(code: &[u8], persistent_ram_size: u16) -> Vec<u8> {
        let mut out = Vec::with_capacity(PROGRAM_HEADER_LEN + code.len());
        out.extend_from_slice(&PROGRAM_MAGIC);
        out.push(PROGRAM_VERSION);
        out.push(0);
        out.extend_from_slice(&persistent_ram_size.to_le_bytes());
        out.extend_from_slice(&(code.len() as u32).to_le_bytes());
        out.extend_from_slice(code);
        out
    }

    /// A short built-in program with 2 KiB of persistent RAM
    pub fn demo_program() -> Vec<u8> {
        let code: Vec<u8> = (0u8..=255).map(|i| i.wrapping_mul(37) ^ 0x5A).collect();
        Self::assemble(&code, 2048)
    }

    /// Frames produced so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn parse_program(program: &[u8]) -> Result<(Vec<u8>, usize), EngineError> {
        if program.len() < PROGRAM_HEADER_LEN {
            return Err(EngineError::InvalidProgram(format!(
                "program too short ({} bytes)",
                program.len()
            )));
        }
        if program[..4] != PROGRAM_MAGIC {
            return Err(EngineError::InvalidProgram("bad magic".into()));
        }
        if program[4] != PROGRAM_VERSION {
            return Err(EngineError::InvalidProgram(format!(
                "unsupported version {}",
                program[4]
            )));
        }
        let persistent = u16::from_le_bytes([program[6], program[7]]) as usize;
        let code_len =
            u32::from_le_bytes([program[8], program[9], program[10], program[11]]) as usize;
        let code = &program[PROGRAM_HEADER_LEN..];
        if code_len == 0 || code.len() != code_len {
            return Err(EngineError::InvalidProgram(format!(
                "code length {} does not match {} payload bytes",
                code_len,
                code.len()
            )));
        }
        Ok((code.to_vec(), persistent))
    }

    /// First tick at which `sample` samples have been produced
    fn tick_for_sample(&self, sample: u64) -> Ticks {
        let num = sample as u128 * TICKS_PER_SECOND as u128;
        let den = self.sample_rate as u128;
        num.div_ceil(den) as Ticks
    }

    /// Samples produced by `ticks`
    fn samples_at(&self, ticks: Ticks) -> u64 {
        (ticks as u128 * self.sample_rate as u128 / TICKS_PER_SECOND as u128) as u64
    }

    fn sample_value(&self, n: u64) -> u8 {
        let half_period = 20 + (self.acc as u64 % 64);
        let amp = 16 + self.acc % 48;
        if (n / half_period) % 2 == 0 {
            128 + amp
        } else {
            128 - amp
        }
    }

    /// Advance to `ticks`, synthesizing audio along the way.
    ///
    /// Callers never pass a tick past the point where the batch fills.
    fn advance_to(&mut self, ticks: Ticks) {
        let end = self.samples_at(ticks);
        for n in self.samples_done..end {
            let v = self.sample_value(n);
            let idx = self.audio_fill * 2;
            self.audio_buf[idx] = v;
            self.audio_buf[idx + 1] = v;
            self.audio_fill += 1;
        }
        self.samples_done = end.max(self.samples_done);
        self.ticks = ticks;
    }

    fn step_frame(&mut self, input: &mut dyn InputSource) {
        let buttons = input.poll(self.ticks);
        let len = self.code.len() as u32;
        for _ in 0..OPS_PER_FRAME {
            let op = self.code[(self.pc % len) as usize];
            let addr = (self.pc as usize * 31 + self.acc as usize) % WORK_RAM_SIZE;
            self.acc = self.acc.wrapping_add(op).rotate_left(1) ^ buttons.bits();
            self.work_ram[addr] = self.work_ram[addr].wrapping_add(self.acc);
            self.pc = self.pc.wrapping_add(1);
        }
        self.frame_count += 1;

        if !self.persistent_ram.is_empty()
            && (self.frame_count % PERSIST_EVERY_FRAMES == 0 || buttons.contains(Buttons::START))
        {
            let idx = (self.frame_count as usize) % self.persistent_ram.len();
            self.persistent_ram[idx] = self.acc;
            self.persistent_updated = true;
        }

        self.render_frame();
    }

    fn render_frame(&mut self) {
        for (i, px) in self.frame_buffer.chunks_exact_mut(4).enumerate() {
            let v = self.work_ram[i % WORK_RAM_SIZE];
            px[0] = v;
            px[1] = v.rotate_left(3);
            px[2] = 255 - v;
            px[3] = 255;
        }
    }

    fn encode_state(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            64 + self.work_ram.len() + self.persistent_ram.len() + self.audio_buf.len(),
        );
        out.extend_from_slice(&STATE_MAGIC);
        out.push(STATE_VERSION);
        out.extend_from_slice(&self.ticks.to_le_bytes());
        out.extend_from_slice(&self.frame_count.to_le_bytes());
        out.extend_from_slice(&self.pc.to_le_bytes());
        out.push(self.acc);
        out.extend_from_slice(&self.samples_done.to_le_bytes());
        out.extend_from_slice(&(self.audio_fill as u32).to_le_bytes());
        for block in [&self.work_ram, &self.persistent_ram, &self.audio_buf] {
            out.extend_from_slice(&(block.len() as u32).to_le_bytes());
            out.extend_from_slice(block);
        }
        out
    }

    fn read_block(cursor: &mut Cursor<&[u8]>, dst: &mut [u8]) -> Result<(), EngineError> {
        let len = cursor.read_u32::<LittleEndian>().map_err(corrupt)? as usize;
        if len != dst.len() {
            return Err(EngineError::SnapshotMismatch {
                expected: dst.len(),
                actual: len,
            });
        }
        cursor.read_exact(dst).map_err(corrupt)
    }
}

fn corrupt(e: std::io::Error) -> EngineError {
    EngineError::CorruptSnapshot(e.to_string())
}

impl StepEngine for ReferenceMachine {
    fn create(program: &[u8], sample_rate: u32, audio_frames: usize) -> Result<Self, EngineError> {
        let (code, persistent) = Self::parse_program(program)?;
        if sample_rate == 0 || audio_frames == 0 {
            return Err(EngineError::InvalidProgram(
                "sample rate and audio batch size must be non-zero".into(),
            ));
        }

        let mut machine = Self {
            code,
            sample_rate,
            audio_frames,
            ticks: 0,
            frame_count: 0,
            pc: 0,
            acc: 0,
            work_ram: vec![0; WORK_RAM_SIZE],
            persistent_ram: vec![0; persistent],
            samples_done: 0,
            audio_fill: 0,
            audio_buf: vec![128; audio_frames * 2],
            audio_out: vec![128; audio_frames * 2],
            frame_buffer: vec![0; FRAME_BYTES],
            persistent_updated: false,
        };
        machine.render_frame();
        Ok(machine)
    }

    fn run_until(&mut self, target: Ticks, input: &mut dyn InputSource) -> Events {
        loop {
            if self.ticks >= target {
                return Events::TARGET_REACHED;
            }

            let next_frame = (self.frame_count + 1) * FRAME_TICKS;
            let needed = (self.audio_frames - self.audio_fill) as u64;
            let next_audio = self.tick_for_sample(self.samples_done + needed);
            let stop = next_frame.min(next_audio).min(target);
            self.advance_to(stop);

            let mut events = Events::empty();
            if self.ticks == next_frame {
                self.step_frame(input);
                events |= Events::FRAME_READY;
            }
            if self.audio_fill == self.audio_frames {
                std::mem::swap(&mut self.audio_buf, &mut self.audio_out);
                self.audio_fill = 0;
                events |= Events::AUDIO_BUFFER_FULL;
            }
            if self.ticks >= target {
                events |= Events::TARGET_REACHED;
            }
            if !events.is_empty() {
                return events;
            }
        }
    }

    fn ticks(&self) -> Ticks {
        self.ticks
    }

    fn ticks_per_second(&self) -> u64 {
        TICKS_PER_SECOND
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.encode_state(), self.ticks)
    }

    fn restore(&mut self, snapshot: &Snapshot) -> Result<(), EngineError> {
        let data = snapshot.data();
        if data.len() < 4 || data[..4] != STATE_MAGIC {
            return Err(EngineError::CorruptSnapshot("bad state magic".into()));
        }
        let mut cursor = Cursor::new(&data[4..]);
        let version = cursor.read_u8().map_err(corrupt)?;
        if version != STATE_VERSION {
            return Err(EngineError::CorruptSnapshot(format!(
                "unsupported state version {}",
                version
            )));
        }

        let ticks = cursor.read_u64::<LittleEndian>().map_err(corrupt)?;
        let frame_count = cursor.read_u64::<LittleEndian>().map_err(corrupt)?;
        let pc = cursor.read_u32::<LittleEndian>().map_err(corrupt)?;
        let acc = cursor.read_u8().map_err(corrupt)?;
        let samples_done = cursor.read_u64::<LittleEndian>().map_err(corrupt)?;
        let audio_fill = cursor.read_u32::<LittleEndian>().map_err(corrupt)? as usize;
        if audio_fill > self.audio_frames {
            return Err(EngineError::CorruptSnapshot(format!(
                "audio fill {} exceeds batch size {}",
                audio_fill, self.audio_frames
            )));
        }

        // Decode into scratch copies so a failed restore leaves state untouched.
        let mut work_ram = vec![0; self.work_ram.len()];
        let mut persistent_ram = vec![0; self.persistent_ram.len()];
        let mut audio_buf = vec![0; self.audio_buf.len()];
        Self::read_block(&mut cursor, &mut work_ram)?;
        Self::read_block(&mut cursor, &mut persistent_ram)?;
        Self::read_block(&mut cursor, &mut audio_buf)?;

        self.ticks = ticks;
        self.frame_count = frame_count;
        self.pc = pc;
        self.acc = acc;
        self.samples_done = samples_done;
        self.audio_fill = audio_fill;
        self.work_ram = work_ram;
        self.persistent_ram = persistent_ram;
        self.audio_buf = audio_buf;
        self.render_frame();
        Ok(())
    }

    fn frame_buffer(&self) -> &[u8] {
        &self.frame_buffer
    }

    fn audio_buffer(&self) -> &[u8] {
        &self.audio_out
    }

    fn read_persistent_ram(&mut self, data: &[u8]) -> Result<(), EngineError> {
        if data.len() != self.persistent_ram.len() {
            return Err(EngineError::PersistentRamSize {
                expected: self.persistent_ram.len(),
                actual: data.len(),
            });
        }
        self.persistent_ram.copy_from_slice(data);
        Ok(())
    }

    fn write_persistent_ram(&self) -> Vec<u8> {
        self.persistent_ram.clone()
    }

    fn persistent_ram_size(&self) -> usize {
        self.persistent_ram.len()
    }

    fn take_persistent_ram_updated(&mut self) -> bool {
        std::mem::take(&mut self.persistent_updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ReferenceMachine {
        ReferenceMachine::create(&ReferenceMachine::demo_program(), 44_100, 4096).unwrap()
    }

    fn run_to(m: &mut ReferenceMachine, target: Ticks, input: &mut dyn InputSource) -> Events {
        let mut all = Events::empty();
        loop {
            let events = m.run_until(target, input);
            all |= events;
            if events.contains(Events::TARGET_REACHED) {
                return all;
            }
        }
    }

    #[test]
    fn create_rejects_invalid_programs() {
        for bad in [
            Vec::new(),
            b"RWPG".to_vec(),
            b"XXXX\x01\x00\x00\x00\x01\x00\x00\x00\x00".to_vec(),
            b"RWPG\x02\x00\x00\x00\x01\x00\x00\x00\x00".to_vec(),
            b"RWPG\x01\x00\x00\x00\x05\x00\x00\x00\x00".to_vec(),
            ReferenceMachine::assemble(&[], 0),
        ] {
            let result = ReferenceMachine::create(&bad, 44_100, 4096);
            assert!(matches!(result, Err(EngineError::InvalidProgram(_))));
        }
    }

    #[test]
    fn run_until_never_overshoots() {
        let mut m = machine();
        let mut input = Buttons::empty();
        let mut last = 0;
        for target in [0, 1, 100, 70_224, 70_225, 500_000, 500_000, 1_000_000] {
            run_to(&mut m, target, &mut input);
            assert!(m.ticks() >= last);
            assert!(m.ticks() <= target.max(last));
            last = m.ticks();
        }
        assert_eq!(m.ticks(), 1_000_000);
    }

    #[test]
    fn run_until_reports_frames_and_audio() {
        let mut m = machine();
        let mut input = Buttons::empty();
        let events = run_to(&mut m, TICKS_PER_SECOND, &mut input);
        assert!(events.contains(Events::FRAME_READY));
        assert!(events.contains(Events::AUDIO_BUFFER_FULL));
        assert_eq!(m.frame_count(), TICKS_PER_SECOND / FRAME_TICKS);
    }

    #[test]
    fn audio_batches_fill_at_expected_rate() {
        let mut m = machine();
        let mut input = Buttons::empty();
        let mut batches = 0;
        loop {
            let events = m.run_until(TICKS_PER_SECOND, &mut input);
            if events.contains(Events::AUDIO_BUFFER_FULL) {
                batches += 1;
                assert_eq!(m.audio_buffer().len(), 4096 * 2);
            }
            if events.contains(Events::TARGET_REACHED) {
                break;
            }
        }
        // 44100 samples per second in 4096-frame batches
        assert_eq!(batches, 44_100 / 4096);
    }

    #[test]
    fn snapshot_restore_is_exact() {
        let mut m = machine();
        let mut input = Buttons::A;
        run_to(&mut m, 1_234_567, &mut input);
        let snap = m.snapshot();
        let frame = m.frame_buffer().to_vec();

        run_to(&mut m, 3_000_000, &mut input);
        let later = m.snapshot();
        assert_ne!(snap.checksum(), later.checksum());

        m.restore(&snap).unwrap();
        assert_eq!(m.ticks(), 1_234_567);
        assert_eq!(m.snapshot(), snap);
        assert_eq!(m.frame_buffer(), &frame[..]);

        run_to(&mut m, 3_000_000, &mut input);
        assert_eq!(m.snapshot(), later);
    }

    #[test]
    fn restore_rejects_garbage_without_mutation() {
        let mut m = machine();
        let mut input = Buttons::empty();
        run_to(&mut m, 200_000, &mut input);
        let before = m.snapshot();

        let bad = Snapshot::new(b"RWST\x01garbage".to_vec(), 0);
        assert!(m.restore(&bad).is_err());
        assert!(m.restore(&Snapshot::new(vec![1, 2, 3], 0)).is_err());
        assert_eq!(m.snapshot(), before);
    }

    #[test]
    fn input_changes_state() {
        let mut a = machine();
        let mut b = machine();
        run_to(&mut a, 1_000_000, &mut Buttons::empty());
        run_to(&mut b, 1_000_000, &mut Buttons::RIGHT);
        assert_ne!(a.snapshot().checksum(), b.snapshot().checksum());
    }

    #[test]
    fn persistent_ram_roundtrip() {
        let mut m = machine();
        assert_eq!(m.persistent_ram_size(), 2048);
        assert!(matches!(
            m.read_persistent_ram(&[1, 2, 3]),
            Err(EngineError::PersistentRamSize { expected: 2048, actual: 3 })
        ));

        let data: Vec<u8> = (0..2048).map(|i| i as u8).collect();
        m.read_persistent_ram(&data).unwrap();
        assert_eq!(m.write_persistent_ram(), data);
        assert!(!m.take_persistent_ram_updated());

        run_to(&mut m, FRAME_TICKS * PERSIST_EVERY_FRAMES, &mut Buttons::empty());
        assert!(m.take_persistent_ram_updated());
        assert!(!m.take_persistent_ram_updated());
    }
}

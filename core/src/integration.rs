//! End-to-end tests for the orchestration core
//!
//! Drives full sessions over the reference machine through pause, seek,
//! auto-rewind, stalls and persistence.

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    use crate::audio::VirtualAudioSink;
    use crate::config::SessionConfig;
    use crate::engine::StepEngine;
    use crate::error::SessionError;
    use crate::input::Buttons;
    use crate::presentation::{PresentationSink, SoftwareFramebuffer};
    use crate::reference::{FRAME_TICKS, ReferenceMachine, TICKS_PER_SECOND};
    use crate::session::{PlaybackState, Session, SharedSession};
    use crate::store::{BlobStore, FileBlobStore, MemoryBlobStore, PersistentRamSync};
    use crate::test_utils::{REFRESH_SEC, TestSession, run_for, session_with, test_session};

    // ============================================================================
    // Pause and seek
    // ============================================================================

    #[test]
    fn slider_seek_round_trip_restores_paused_frame() {
        let mut session = test_session();
        run_for(&mut session, 0.0, 3.0);
        session.pause();

        let paused_frame = session.presentation().pixels().to_vec();
        let (oldest, newest) = session.rewind_range().unwrap();
        assert_eq!(session.ticks(), newest);

        assert!(session.rewind_to_ticks(oldest));
        assert_eq!(session.ticks(), oldest);
        assert_ne!(session.presentation().pixels(), &paused_frame[..]);

        assert!(session.rewind_to_ticks(newest));
        assert_eq!(session.presentation().pixels(), &paused_frame[..]);

        assert!(session.rewind_to_ticks(oldest));
        assert!(session.rewind_to_ticks(newest));
        assert_eq!(session.presentation().pixels(), &paused_frame[..]);
    }

    #[test]
    fn slider_positions_map_one_to_one() {
        let mut session = test_session();
        run_for(&mut session, 0.0, 2.0);
        session.pause();
        let (oldest, newest) = session.rewind_range().unwrap();

        for step in 0..=10u64 {
            let target = oldest + (newest - oldest) * step / 10;
            assert!(session.rewind_to_ticks(target));
            assert_eq!(session.ticks(), target);
            assert_eq!(session.engine().ticks(), target);
        }
        assert!(!session.rewind_to_ticks(newest + 1));
        assert_eq!(session.ticks(), newest);
    }

    #[test]
    fn seek_result_is_path_independent() {
        let mut session = test_session();
        let mut now = 0.0;
        for frame in 0..180 {
            session.set_buttons(if frame % 20 < 5 { Buttons::A } else { Buttons::empty() });
            session.audio_mut().sink_mut().set_now(now);
            session.on_animation_frame(now);
            now += REFRESH_SEC;
        }
        session.pause();
        let (oldest, newest) = session.rewind_range().unwrap();
        let target = oldest + (newest - oldest) / 3 + 777;

        assert!(session.rewind_to_ticks(target));
        let direct = session.engine().snapshot();

        assert!(session.rewind_to_ticks(oldest));
        assert!(session.rewind_to_ticks(newest));
        assert!(session.rewind_to_ticks(target));
        assert_eq!(session.engine().snapshot(), direct);
    }

    #[test]
    fn resume_continues_from_seek_position() {
        let mut session = test_session();
        let now = run_for(&mut session, 0.0, 2.0);
        session.pause();
        let target = 40 * FRAME_TICKS;
        assert!(session.rewind_to_ticks(target));
        session.resume();
        assert_eq!(session.ticks(), target);

        run_for(&mut session, now, 0.5);
        let (oldest, newest) = session.rewind_range().unwrap();
        assert_eq!(oldest, FRAME_TICKS);
        assert!(newest > target && newest < target + 40 * FRAME_TICKS);
        assert!(session.ticks() >= newest);
    }

    #[test]
    fn pause_right_after_resume_stays_at_seek_position() {
        let mut session = test_session();
        let now = run_for(&mut session, 0.0, 2.0);
        session.pause();
        let target = 40 * FRAME_TICKS;
        assert!(session.rewind_to_ticks(target));
        session.resume();

        // First refresh after resume advances nothing
        let report = session.on_animation_frame(now).unwrap();
        assert_eq!(report.ticks_advanced, 0);
        session.pause();

        assert_eq!(session.engine().ticks(), target);
        assert_eq!(session.ticks(), target);
        assert_eq!(session.rewind_range().unwrap().1, target);
        assert!(!session.rewind_to_ticks(target + 10 * FRAME_TICKS));
    }

    // ============================================================================
    // Auto-rewind
    // ============================================================================

    #[test]
    fn auto_rewind_runs_back_to_oldest_and_resumes() {
        let mut session = test_session();
        let mut now = run_for(&mut session, 0.0, 1.0);
        session.enter_auto_rewind(now);
        assert_eq!(session.state(), PlaybackState::Rewinding);

        // 1.5x real time: one second of history takes under a second
        let mut fires = 0;
        while now < 3.0 {
            now += 0.016;
            if session.on_rewind_timer(now).unwrap() {
                fires += 1;
            }
            // Refresh callbacks do nothing while rewinding
            assert!(session.on_animation_frame(now).is_none());
        }
        let (oldest, _) = session.rewind_range().unwrap();
        assert_eq!(session.ticks(), oldest);
        assert!(fires > 30 && fires < 50, "{fires} fires");

        session.resume();
        assert_eq!(session.state(), PlaybackState::Running);
        run_for(&mut session, now, 0.5);
        assert!(session.ticks() > oldest);
    }

    #[test]
    fn toggle_pause_leaves_auto_rewind() {
        let mut session = test_session();
        let now = run_for(&mut session, 0.0, 1.0);
        session.enter_auto_rewind(now);
        session.toggle_pause();
        assert_eq!(session.state(), PlaybackState::Running);
        assert!(!session.on_rewind_timer(now + 0.5).unwrap());
    }

    // ============================================================================
    // Capacity and eviction
    // ============================================================================

    #[test]
    fn small_history_evicts_whole_groups() {
        let mut config = SessionConfig::default();
        config.rewind.buffer_capacity = 512 * 1024;
        config.rewind.frames_per_base_state = 15;
        let mut session = session_with(&config);

        let mut now = 0.0;
        let mut last_oldest = 0;
        for _ in 0..600 {
            session.audio_mut().sink_mut().set_now(now);
            session.on_animation_frame(now);
            now += REFRESH_SEC;

            let stats = session.rewind_stats();
            assert!(stats.size <= config.rewind.buffer_capacity);
            if let Some(oldest) = stats.oldest_ticks {
                assert!(oldest >= last_oldest);
                // Oldest is always a base record, so group-aligned
                assert_eq!((oldest / FRAME_TICKS - 1) % 15, 0);
                last_oldest = oldest;
            }
        }
        assert!(session.rewind_stats().evicted_groups > 0);

        session.pause();
        let (oldest, newest) = session.rewind_range().unwrap();
        assert!(session.rewind_to_ticks(oldest));
        assert!(session.rewind_to_ticks((oldest + newest) / 2));
        assert!(!session.rewind_to_ticks(oldest - 1));
    }

    // ============================================================================
    // Audio
    // ============================================================================

    #[test]
    fn stall_resets_audio_instead_of_queuing() {
        let mut session = test_session();
        let now = run_for(&mut session, 0.0, 1.0);
        assert_eq!(session.audio().resets(), 0);
        let scheduled = session.audio().scheduled();

        // Two seconds without callbacks
        let resumed = now + 2.0;
        let after = run_for(&mut session, resumed, 0.5);
        assert_eq!(session.audio().resets(), 1);

        let starts = session.audio().sink().starts();
        let post_stall: Vec<f64> = starts
            .iter()
            .copied()
            .filter(|&t| t > now + 0.5)
            .collect();
        assert!(!post_stall.is_empty());
        assert!(post_stall[0] >= resumed);
        assert!(post_stall[0] < after + 0.2);
        // Backlog dropped: fewer than a second's worth of batches since
        assert!(session.audio().scheduled() - scheduled < 10);
    }

    #[test]
    fn engine_time_base_keeps_audio_in_step() {
        let mut session = test_session();
        assert_eq!(session.ticks_per_second(), TICKS_PER_SECOND);

        let after = run_for(&mut session, 0.0, 20.0);
        let last = after - REFRESH_SEC;
        let simulated = session.ticks() as f64 / TICKS_PER_SECOND as f64;
        assert!((simulated - last).abs() < 0.02, "{simulated}s simulated in {last}s");

        let config = SessionConfig::default();
        let lead = session.audio().start_time().unwrap() - last;
        assert!(
            lead <= config.audio.latency_sec + 2.0 * config.audio_batch_sec(),
            "audio lead grew to {lead:.3}s"
        );
        assert_eq!(session.audio().resets(), 0);
    }

    #[test]
    fn pause_suspends_and_resume_reanchors_audio() {
        let mut session = test_session();
        let now = run_for(&mut session, 0.0, 1.0);
        session.pause();
        assert!(session.audio().sink().is_suspended());
        assert_eq!(session.audio().resets(), 0);

        session.resume();
        assert!(!session.audio().sink().is_suspended());
        assert_eq!(session.audio().start_time(), None);

        // Play resumes much later without a drift reset
        run_for(&mut session, now + 30.0, 0.5);
        assert_eq!(session.audio().resets(), 0);
        let start = session.audio().start_time().unwrap();
        assert!(start > now + 30.0);
    }

    #[test]
    fn no_audio_while_rewinding() {
        let mut session = test_session();
        let now = run_for(&mut session, 0.0, 1.0);
        session.pause();
        let scheduled = session.audio().scheduled();
        let (oldest, newest) = session.rewind_range().unwrap();
        assert!(session.rewind_to_ticks(oldest));
        assert!(session.rewind_to_ticks(newest));
        run_for(&mut session, now, 1.0);
        assert_eq!(session.audio().scheduled(), scheduled);
    }

    // ============================================================================
    // Creation and teardown
    // ============================================================================

    /// Presentation sink that reports uploads and its own drop
    struct TrackingSink {
        uploads: Rc<Cell<u32>>,
        dropped: Rc<Cell<bool>>,
    }

    impl PresentationSink for TrackingSink {
        fn upload(&mut self, _pixels: &[u8]) {
            self.uploads.set(self.uploads.get() + 1);
        }
        fn present(&mut self) {}
    }

    impl Drop for TrackingSink {
        fn drop(&mut self) {
            self.dropped.set(true);
        }
    }

    #[test]
    fn invalid_program_creates_nothing() {
        let uploads = Rc::new(Cell::new(0));
        let dropped = Rc::new(Cell::new(false));
        let sink = TrackingSink {
            uploads: uploads.clone(),
            dropped: dropped.clone(),
        };

        let result = Session::<ReferenceMachine, _, _>::create(
            b"RWPG\x01\x00\x00\x00\xff\x00\x00\x00",
            None,
            &SessionConfig::default(),
            VirtualAudioSink::new(),
            sink,
        );
        assert!(matches!(result, Err(SessionError::InvalidProgram(_))));
        assert_eq!(uploads.get(), 0);
        assert!(dropped.get());
    }

    #[test]
    fn shutdown_while_rewinding() {
        let mut session = test_session();
        let now = run_for(&mut session, 0.0, 1.0);
        session.enter_auto_rewind(now);
        session.on_rewind_timer(now + 0.1).unwrap();
        let ram = session.shutdown();
        assert_eq!(ram.len(), 2048);
    }

    #[test]
    fn shared_session_across_threads() {
        let session: SharedSession<_, _, _> = Arc::new(Mutex::new(test_session()));

        let worker = {
            let session = Arc::clone(&session);
            std::thread::spawn(move || {
                let mut guard = session.lock().unwrap();
                run_for(&mut guard, 0.0, 1.0)
            })
        };
        let now = worker.join().unwrap();

        let mut guard = session.lock().unwrap();
        guard.enter_auto_rewind(now);
        assert!(guard.on_rewind_timer(now + 0.02).unwrap());
    }

    // ============================================================================
    // Persistence
    // ============================================================================

    #[test]
    fn persistent_ram_survives_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileBlobStore::new(dir.path());
        let program = ReferenceMachine::demo_program();
        let mut sync = PersistentRamSync::new(&program, "demo.rwp", 1000);

        let mut first = test_session();
        let mut now = 0.0;
        while now < 3.0 {
            first.audio_mut().sink_mut().set_now(now);
            first.on_animation_frame(now);
            sync.poll(now, &mut first, &mut store).unwrap();
            now += REFRESH_SEC;
        }
        let ram = first.shutdown();
        sync.flush(&ram, None, &mut store).unwrap();

        let stored = sync.load(&store).unwrap().unwrap();
        assert_eq!(stored, ram);
        assert_eq!(store.keys().unwrap(), vec![sync.key().to_string()]);

        let second: TestSession = Session::create(
            &program,
            Some(&stored),
            &SessionConfig::default(),
            VirtualAudioSink::new(),
            SoftwareFramebuffer::default(),
        )
        .unwrap();
        assert_eq!(second.persistent_ram(), ram);
    }

    #[test]
    fn memory_store_keeps_programs_by_content() {
        let mut store = MemoryBlobStore::new();
        let program = ReferenceMachine::demo_program();
        let key = crate::store::ProgramKey::of(&program);
        store
            .put(&key.program(), &crate::store::BlobRecord::new(program.clone(), "demo.rwp"))
            .unwrap();

        let loaded = store.get(&key.program()).unwrap().unwrap();
        let session: TestSession = Session::create(
            &loaded.bytes,
            None,
            &SessionConfig::default(),
            VirtualAudioSink::new(),
            SoftwareFramebuffer::default(),
        )
        .unwrap();
        assert_eq!(session.state(), PlaybackState::Running);
    }
}

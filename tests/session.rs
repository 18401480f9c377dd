// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

extern crate mandelview;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mandelview::color::OPAQUE;
use mandelview::params::IterationStep;
use mandelview::session::{self, Presenter, Step};
use mandelview::{Engine, EngineOptions};

/// Remembers the size of every frame it was shown.
#[derive(Clone, Default)]
struct Recorder {
    frames: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl Recorder {
    fn frames(&self) -> Vec<(usize, usize)> {
        self.frames.lock().unwrap().clone()
    }
}

impl Presenter for Recorder {
    fn present(&mut self, width: usize, height: usize, pixels: &[u32]) {
        assert_eq!(pixels.len(), width * height);
        assert!(pixels.iter().all(|&p| p & OPAQUE == OPAQUE));
        self.frames.lock().unwrap().push((width, height));
    }
}

fn engine(width: usize, height: usize) -> Engine {
    let options = EngineOptions::default()
        .force_cpu(true)
        .lanes(2)
        .max_iterations(30)
        .antialias_samples(2);
    Engine::initialize(width, height, options).unwrap()
}

fn wait_for<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn stepping_a_session_by_hand() {
    let recorder = Recorder::default();
    let (mut compute, input) = session::session(engine(12, 8), recorder.clone()).unwrap();

    assert_eq!(compute.step().unwrap(), Step::Generated);
    assert_eq!(compute.step().unwrap(), Step::Antialiased);
    assert_eq!(compute.step().unwrap(), Step::Antialiased);
    assert_eq!(compute.step().unwrap(), Step::Idle);

    input.zoom_in();
    assert_eq!(compute.step().unwrap(), Step::Generated);

    input.change_iterations(IterationStep::Ten, true);
    assert_eq!(compute.step().unwrap(), Step::Generated);
    assert_eq!(compute.engine().parameters().max_iterations, 40);

    input.request_resize(20, 5);
    assert_eq!(compute.step().unwrap(), Step::Generated);
    assert_eq!(recorder.frames().last(), Some(&(20, 5)));
    assert_eq!(recorder.frames().len(), 6);
}

#[test]
fn threaded_session_follows_input() {
    let recorder = Recorder::default();
    let (input, handle) = session::spawn(engine(16, 9), recorder.clone()).unwrap();

    wait_for(|| !recorder.frames().is_empty());
    input.pan_left();
    input.drag(3, -2);
    input.request_resize(10, 10);
    wait_for(|| recorder.frames().contains(&(10, 10)));

    let export = input.export(32, 18).unwrap();
    assert_eq!(export.len(), 32 * 18);

    input.quit();
    let engine = handle.join().unwrap().unwrap();
    assert_eq!(engine.dimensions(), (10, 10));
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

extern crate clap;
extern crate env_logger;
extern crate failure;
extern crate image;
extern crate mandelview;

use clap::{App, Arg, ArgMatches};
use image::{ColorType, ImageFormat};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use mandelview::color::to_rgb8;
use mandelview::config::{
    DEFAULT_EXPONENT, DEFAULT_HEIGHT, DEFAULT_ITERATIONS, DEFAULT_WIDTH, MAX_DIMENSION,
    MAX_EXPONENT, MAX_ITERATIONS, MIN_EXPONENT, MIN_ITERATIONS,
};
use mandelview::scale::{self, Filter};
use mandelview::{Engine, EngineOptions, Viewport};

fn parse_pair<T>(s: &str, separator: char) -> Option<(T, T)>
where
    T: FromStr,
{
    match s.find(separator) {
        None => None,
        Some(index) => match (T::from_str(&s[..index]), T::from_str(&s[index + 1..])) {
            (Ok(l), Ok(r)) => Some((l, r)),
            _ => None,
        },
    }
}

fn validate_size(s: &str) -> Result<(), String> {
    match parse_pair::<usize>(s, 'x') {
        Some((w, h)) if w >= 1 && h >= 1 && w <= MAX_DIMENSION && h <= MAX_DIMENSION => Ok(()),
        Some(_) => Err(format!("Export size must be between 1x1 and {0}x{0}", MAX_DIMENSION)),
        None => Err("Could not parse export size".to_string()),
    }
}

fn validate_range<T: FromStr + Ord>(
    s: &str,
    low: T,
    high: T,
    isnotanumber_err: &str,
    isnotinrange_err: &str,
) -> Result<(), String> {
    match T::from_str(s) {
        Ok(i) => {
            if i >= low && i <= high {
                Ok(())
            } else {
                Err(isnotinrange_err.to_string())
            }
        }
        Err(_) => Err(isnotanumber_err.to_string()),
    }
}

const WIDTH: &str = "width";
const HEIGHT: &str = "height";
const VERBOSE: &str = "verbose";
const NO_AA: &str = "no-aa";
const FORCE_CPU: &str = "force-cpu";
const NO_SIMD: &str = "no-simd";
const SCREENSHOT_DIR: &str = "screenshot-dir";
const ITERATIONS: &str = "iterations";
const EXPONENT: &str = "exponent";
const EXPORT: &str = "export";
const SUPERSAMPLE: &str = "supersample";
const FILTER: &str = "filter";

fn args<'a>() -> ArgMatches<'a> {
    App::new("mandelview")
        .version("0.1.0")
        .author("Elf M. Sternberg <elf.sternberg@gmail.com>")
        .about("Mandelbrot renderer")
        .arg(
            Arg::with_name(WIDTH)
                .long(WIDTH)
                .short("w")
                .takes_value(true)
                .validator(|s| {
                    validate_range(
                        &s,
                        1,
                        MAX_DIMENSION,
                        "Could not parse width",
                        &format!("Width must be between 1 and {}", MAX_DIMENSION),
                    )
                })
                .help("Width of the image [default: 1600]"),
        )
        .arg(
            Arg::with_name(HEIGHT)
                .long(HEIGHT)
                .short("h")
                .takes_value(true)
                .validator(|s| {
                    validate_range(
                        &s,
                        1,
                        MAX_DIMENSION,
                        "Could not parse height",
                        &format!("Height must be between 1 and {}", MAX_DIMENSION),
                    )
                })
                .help("Height of the image [default: 900]"),
        )
        .arg(
            Arg::with_name(VERBOSE)
                .short("v")
                .multiple(true)
                .help("Log more; repeat for even more"),
        )
        .arg(
            Arg::with_name(NO_AA)
                .long(NO_AA)
                .help("Skip the antialias passes"),
        )
        .arg(
            Arg::with_name(FORCE_CPU)
                .long(FORCE_CPU)
                .help("Never use the GPU"),
        )
        .arg(
            Arg::with_name(NO_SIMD)
                .long(NO_SIMD)
                .help("Never use the vectorized CPU renderer"),
        )
        .arg(
            Arg::with_name(SCREENSHOT_DIR)
                .long(SCREENSHOT_DIR)
                .takes_value(true)
                .default_value(".")
                .help("Directory images are written to"),
        )
        .arg(
            Arg::with_name(ITERATIONS)
                .long(ITERATIONS)
                .short("i")
                .takes_value(true)
                .validator(|s| {
                    validate_range(
                        &s,
                        MIN_ITERATIONS,
                        MAX_ITERATIONS,
                        "Could not parse iteration count",
                        &format!(
                            "Iteration count must be between {} and {}",
                            MIN_ITERATIONS, MAX_ITERATIONS
                        ),
                    )
                })
                .help("Maximum number of iterations per point [default: 800]"),
        )
        .arg(
            Arg::with_name(EXPONENT)
                .long(EXPONENT)
                .short("e")
                .takes_value(true)
                .validator(|s| {
                    validate_range(
                        &s,
                        MIN_EXPONENT,
                        MAX_EXPONENT,
                        "Could not parse exponent",
                        &format!(
                            "Exponent must be between {} and {}",
                            MIN_EXPONENT, MAX_EXPONENT
                        ),
                    )
                })
                .help("Power z is raised to on every iteration [default: 2]"),
        )
        .arg(
            Arg::with_name(EXPORT)
                .long(EXPORT)
                .takes_value(true)
                .validator(|s| validate_size(&s))
                .help("Also render the view at this size (e.g. 3840x2160) into export.bmp"),
        )
        .arg(
            Arg::with_name(SUPERSAMPLE)
                .long(SUPERSAMPLE)
                .takes_value(true)
                .requires(EXPORT)
                .validator(|s| {
                    validate_range(
                        &s,
                        1usize,
                        4,
                        "Could not parse supersample factor",
                        "Supersample factor must be between 1 and 4",
                    )
                })
                .help("Render the export this many times larger, then scale it down"),
        )
        .arg(
            Arg::with_name(FILTER)
                .long(FILTER)
                .takes_value(true)
                .requires(SUPERSAMPLE)
                .possible_values(&["nearest", "bilinear"])
                .help("How a supersampled export is scaled down [default: bilinear]"),
        )
        .get_matches()
}

fn init_logging(verbosity: u64) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn write_image(path: &Path, pixels: &[u32], bounds: (usize, usize)) -> Result<(), failure::Error> {
    image::save_buffer_with_format(
        path,
        &to_rgb8(pixels),
        bounds.0 as u32,
        bounds.1 as u32,
        ColorType::Rgb8,
        ImageFormat::Bmp,
    )?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

fn value_or<T: FromStr>(matches: &ArgMatches, name: &str, default: T) -> Result<T, failure::Error> {
    match matches.value_of(name) {
        None => Ok(default),
        Some(raw) => {
            T::from_str(raw).map_err(|_| failure::format_err!("Could not parse {} '{}'", name, raw))
        }
    }
}

fn run(matches: &ArgMatches) -> Result<(), failure::Error> {
    let width = value_or(matches, WIDTH, DEFAULT_WIDTH)?;
    let height = value_or(matches, HEIGHT, DEFAULT_HEIGHT)?;
    let options = EngineOptions::default()
        .force_cpu(matches.is_present(FORCE_CPU))
        .disable_simd(matches.is_present(NO_SIMD))
        .disable_antialias(matches.is_present(NO_AA))
        .max_iterations(value_or(matches, ITERATIONS, DEFAULT_ITERATIONS)?)
        .exponent(value_or(matches, EXPONENT, DEFAULT_EXPONENT)?);
    let directory = PathBuf::from(matches.value_of(SCREENSHOT_DIR).unwrap_or("."));

    let mut engine = Engine::initialize(width, height, options)?;
    let viewport = Viewport::initial(width, height);
    engine.generate(viewport)?;
    while engine.antialias_pass(viewport)? {}
    write_image(&directory.join("output.bmp"), engine.pixels(), (width, height))?;

    if let Some((export_width, export_height)) = matches
        .value_of(EXPORT)
        .and_then(|s| parse_pair::<usize>(s, 'x'))
    {
        let factor = value_or(matches, SUPERSAMPLE, 1usize)?;
        let filter = value_or(matches, FILTER, Filter::default())?;
        let exporter = engine.exporter()?;
        let (big_width, big_height) = (export_width * factor, export_height * factor);
        let mut pixels = exporter.render(big_width, big_height, viewport)?;
        if factor > 1 {
            pixels = scale::resample(
                filter,
                &pixels,
                big_width,
                big_height,
                export_width,
                export_height,
            )?;
        }
        write_image(
            &directory.join("export.bmp"),
            &pixels,
            (export_width, export_height),
        )?;
    }

    engine.shutdown();
    Ok(())
}

fn main() {
    let matches = args();
    init_logging(matches.occurrences_of(VERBOSE));
    if let Err(e) = run(&matches) {
        eprintln!("Render failure: {}", e);
        std::process::exit(1);
    }
}

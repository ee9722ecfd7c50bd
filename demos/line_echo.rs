// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Toggle one line and print the edges seen on another. The two lines are
//! expected to be wired together.

use std::time::Duration;

use gpio_lines::options::{Direction, EdgeDetect, RequestOptions};
use gpio_lines::{CdevBackend, Chip, ChipConfig, LineValue};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Cli {
    /// Number of the gpiochip (N in /dev/gpiochipN)
    #[structopt(long, default_value = "0")]
    chip: u32,
    /// Line to toggle
    #[structopt(long, default_value = "19")]
    output: u32,
    /// Line to watch
    #[structopt(long, default_value = "20")]
    input: u32,
    /// Toggle period in milliseconds
    #[structopt(long, default_value = "1000")]
    period_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::from_args();

    let chip = Chip::open(CdevBackend::new(), ChipConfig::new(args.chip, "line-echo")?)?;

    let output = chip.line(args.output);
    let output = output
        .open(Direction::Output, LineValue::Inactive, RequestOptions::new())?
        .acquire()?;

    let input = chip.line(args.input);
    let input = input
        .monitor(EdgeDetect::Both, RequestOptions::new())?
        .acquire()?;
    let mut events = input.events()?;

    let mut ticker = tokio::time::interval(Duration::from_millis(args.period_ms));
    let mut level = LineValue::Inactive;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                level = LineValue::new(!level.is_active());
                output.set_value(level)?;
            }
            event = events.next_event() => {
                let event = event?;
                let state = if event.value().is_active() { "on" } else { "off" };
                println!("{event} {state}");
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use anyhow::Context;
use gpio_lines::options::{Active, Bias, Direction, RequestOptions};
use gpio_lines::{CdevBackend, Chip, ChipConfig, ChipSelector, LineValue};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Cli {
    /// Number of the gpiochip (N in /dev/gpiochipN)
    #[structopt(long)]
    chip: Option<u32>,
    /// Label of the gpiochip, instead of its number
    #[structopt(long)]
    label: Option<String>,
    /// The offset of the GPIO line for the provided chip
    line: u32,
    /// Treat the line as active-low
    #[structopt(long)]
    active_low: bool,
    /// Enable the pull-up bias
    #[structopt(long)]
    pull_up: bool,
    #[structopt(long, default_value = "line-value")]
    consumer: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::from_args();

    let selector = ChipSelector::from_parts(args.chip, args.label.as_deref())?;
    let chip = Chip::open(CdevBackend::new(), ChipConfig::new(selector, &args.consumer)?)?;

    let mut options = RequestOptions::new();
    if args.active_low {
        options = options.with_active(Active::Low);
    }
    if args.pull_up {
        options = options.with_bias(Bias::PullUp);
    }

    let line = chip.line(args.line);
    let line = line
        .open(Direction::Input, LineValue::Inactive, options)?
        .acquire()
        .with_context(|| format!("requesting line {} of {chip}", args.line))?;

    println!("{}", line.value()?);
    Ok(())
}

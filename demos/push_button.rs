// Copyright (c) 2018 The rust-gpio-cdev Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Toggle an LED every time a push button is pressed.

use std::time::Duration;

use gpio_lines::options::{Bias, Direction, EdgeDetect, RequestOptions};
use gpio_lines::{CdevBackend, Chip, ChipConfig, ChipSelector, LineValue, Timestamp};
use log::{debug, info};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Cli {
    /// Number of the gpiochip (N in /dev/gpiochipN)
    #[structopt(long)]
    chip: Option<u32>,
    /// Label of the gpiochip, instead of its number
    #[structopt(long)]
    label: Option<String>,
    /// Line the button is connected to
    #[structopt(long, default_value = "23")]
    button: u32,
    /// Line the LED is connected to
    #[structopt(long, default_value = "24")]
    led: u32,
    /// Presses closer together than this are treated as bounce
    #[structopt(long, default_value = "200")]
    debounce_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::from_args();

    let selector = ChipSelector::from_parts(args.chip, args.label.as_deref())?;
    let chip = Chip::open(CdevBackend::new(), ChipConfig::new(selector, "push-button")?)?;

    let led = chip.line(args.led);
    let led = led
        .open(Direction::Output, LineValue::Inactive, RequestOptions::new())?
        .acquire()?;

    let button = chip.line(args.button);
    let button = button
        .monitor(
            EdgeDetect::Rising,
            RequestOptions::new().with_bias(Bias::PullDown),
        )?
        .acquire()?;
    let mut presses = button.events()?;

    let debounce = Duration::from_millis(args.debounce_ms);
    let mut last: Option<Timestamp> = None;
    info!("Waiting for presses on {}", *button);

    loop {
        let event = tokio::select! {
            event = presses.next_event() => event?,
            _ = tokio::signal::ctrl_c() => break,
        };

        let at = event.raw_timestamp();
        if matches!(last, Some(prev) if at.duration_since(prev) < debounce) {
            debug!("Ignoring bounce at {at}");
            continue;
        }
        last = Some(at);

        let lit = !led.value()?.is_active();
        led.set_value(lit)?;
        info!("LED {}", if lit { "on" } else { "off" });
    }

    Ok(())
}

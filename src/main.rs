//! HDMI Peripheral video player

use std::process::exit;
use std::sync::Arc;

use color_eyre::Result;
use tracing::{info, warn};

use hdmi_player::device::HdmiDevice;
use hdmi_player::fb::FbAllocator;
use hdmi_player::present::{DoubleBuffer, HdmiScreen, Presenter};
use hdmi_player::video::VideoSource;
use hdmi_player::{signals, Config, CONFIG};

const USAGE: &str = "Usage: hdmi-player [VIDEO] [FDIV]
Plays the video file specified by [VIDEO] using the HDMI Peripheral
with the frame-rate divider [FDIV]

The input video must be 640x480, and it must have frames encoded as
YUV420P. It also cannot have any audio associated with it - it must be
a single stream.

The frame-rate divider is applied to a 60Hz refresh rate. In other
words, the frame rate is (60Hz / [FDIV]). Setting the divider too low
will cause frames to miss their deadline and for the video to be
played back slower. A stable value is [FDIV] = 3.

Finally, this program must be used with the HDMI Peripheral. It must
be run as root to interact with the device.
";

/// Print the usage and exit with code 1
fn usage() -> ! {
    eprint!("{USAGE}");
    exit(1);
}

fn parse_fdiv(s: &str) -> Option<i32> {
    s.parse().ok().filter(|fdiv| *fdiv > 0)
}

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("hdmi_player=info")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_writer(std::io::stderr)
        .init();

    // Check if the user is asking for help
    let args: Vec<String> = std::env::args().collect();
    if args.len() == 2 && (args[1] == "help" || args[1] == "--help") {
        usage();
    }
    // Check for correct usage
    if args.len() != 3 {
        eprintln!("Usage: wrong number of arguments");
        usage();
    }
    if !nix::unistd::geteuid().is_root() {
        eprintln!("Usage: must be run as root");
        usage();
    }
    let Some(fdiv) = parse_fdiv(&args[2]) else {
        eprintln!("Usage: invalid frame-rate divider");
        usage();
    };

    let config = Config::default();
    CONFIG.store(Arc::new(config.clone()));

    // Open the video to play; a bad input is a usage error, not an
    // infrastructure one
    let mut video = match VideoSource::open(&args[1]) {
        Ok(video) => video,
        Err(e) => {
            eprintln!("Usage: failed to open video: {e}");
            usage();
        }
    };

    // Two framebuffers to double-buffer with
    let mut alloc = match FbAllocator::open() {
        Ok(alloc) => alloc,
        Err(e) => {
            eprintln!("Error: failed to open framebuffer allocator: {e}");
            exit(127);
        }
    };
    let slots = match alloc.allocate_pair() {
        Ok(slots) => slots,
        Err(e) => {
            eprintln!("Error: failed to allocate framebuffer: {e}");
            exit(127);
        }
    };

    // Setup the SIGINT and SIGTERM handlers before the device exists so
    // there is no window where a kill leaves it running
    if let Err(e) = signals::install() {
        eprintln!("Error: couldn't setup signal handler: {e}");
        exit(127);
    }

    let device = match HdmiDevice::open() {
        Ok(device) => device,
        Err(e) => {
            eprintln!("Error: failed to open HDMI Peripheral: {e}");
            exit(127);
        }
    };

    // Best-effort pin; keeps the busy-polls from migrating mid-spin
    match core_affinity::get_core_ids().and_then(|ids| ids.into_iter().next()) {
        Some(core) if core_affinity::set_for_current(core) => {}
        _ => warn!("failed to pin playback thread"),
    }

    info!(
        "Done with setup, target rate {:.1} fps",
        config.video.refresh_hz as f64 / fdiv as f64
    );

    let result = {
        let mut screen = HdmiScreen::new(&device, &slots);
        let mut pool = DoubleBuffer::new(&mut alloc, slots);
        Presenter::new(fdiv).play(&mut video, &mut pool, &mut screen)
    };

    // Normal teardown: stop and close the device before the buffers it
    // may still reference go away, then the buffers, then the producer
    info!("Cleaning up...");
    device.stop();
    drop(device);
    drop(alloc);
    drop(video);
    info!("Cleaned up!");

    match result {
        Ok(stats) => {
            info!(
                "Presented {} frames, {} deadline misses, {} decode errors",
                stats.frames_presented, stats.deadline_misses, stats.decode_errors
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: fatal decode failure: {e}");
            exit(127);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_fdiv;

    #[test]
    fn accepts_positive_dividers() {
        assert_eq!(parse_fdiv("1"), Some(1));
        assert_eq!(parse_fdiv("3"), Some(3));
        assert_eq!(parse_fdiv("60"), Some(60));
    }

    #[test]
    fn rejects_everything_else() {
        assert_eq!(parse_fdiv("0"), None);
        assert_eq!(parse_fdiv("-1"), None);
        assert_eq!(parse_fdiv("3x"), None);
        assert_eq!(parse_fdiv(""), None);
        assert_eq!(parse_fdiv("2.5"), None);
    }
}

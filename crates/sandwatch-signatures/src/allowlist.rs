//! Fixed image and command allow-lists used by the detectors

use regex::Regex;
use std::sync::LazyLock;

/// A browser that acts as the root of an analysis, with the helpers it is
/// expected to spawn
#[derive(Debug)]
pub struct Browser {
    pub name: &'static str,
    pub images: &'static [&'static str],
    pub children: &'static [&'static str],
}

impl Browser {
    pub fn is_image(&self, image: &str) -> bool {
        self.images.contains(&image)
    }

    pub fn allows_child(&self, image: &str) -> bool {
        self.children.contains(&image)
    }
}

pub const INTERNET_EXPLORER: Browser = Browser {
    name: "Internet Explorer",
    images: &[
        "C:\\Program Files\\Internet Explorer\\iexplore.exe",
        "C:\\Program Files (x86)\\Internet Explorer\\IEXPLORE.EXE",
    ],
    children: &[
        "C:\\Windows\\System32\\ie4uinit.exe",
        "C:\\Windows\\SysWOW64\\WerFault.exe",
    ],
};

pub const FIREFOX: Browser = Browser {
    name: "Firefox",
    images: &["C:\\Program Files (x86)\\Mozilla Firefox\\firefox.exe"],
    children: &[
        "C:\\Program Files (x86)\\Mozilla Firefox\\uninstall\\helper.exe",
        "C:\\Program Files (x86)\\Mozilla Firefox\\crashreporter.exe",
    ],
};

pub const BROWSERS: &[&Browser] = &[&INTERNET_EXPLORER, &FIREFOX];

/// Benign utilities regardless of which process started them
pub const GENERIC_CHILDREN: &[&str] =
    &["C:\\Windows\\SysWOW64\\Macromed\\Flash\\FlashPlayerUpdateService.exe"];

/// DLL host used by Internet Explorer for history maintenance
pub const RUNDLL32: &str = "C:\\Windows\\system32\\rundll32.exe";

/// Internet Explorer clearing browsing history through `inetcpl.cpl`
pub static IE_CLEAR_TRACKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^C:\\Windows\\system32\\rundll32\.exe C:\\Windows\\system32\\inetcpl\.cpl,ClearMyTracksByProcess Flags:\d+ WinX:0 WinY:0 IEFrame:0000000000000000",
    )
    .unwrap()
});

/// The browser an image belongs to, if any
pub fn browser_for(image: &str) -> Option<&'static Browser> {
    BROWSERS.iter().copied().find(|b| b.is_image(image))
}

pub fn is_generic_child(image: &str) -> bool {
    GENERIC_CHILDREN.contains(&image)
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod download;
mod filename;
mod partial;
mod shownotes;

pub use download::{TaskOutcome, download_enclosure};
pub use filename::{
    SHOWNOTES_DIR, channel_directory_name, generate_filename, generate_filename_stem,
    get_audio_extension, shownotes_filename,
};
pub use partial::{PARTIAL_SUFFIX, PartialFile, partial_path};
pub use shownotes::{HtmlShownotes, ShownotesRenderer, save_shownotes};

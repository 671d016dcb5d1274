//! Mapping extractor progress onto the five-stage overall scale.
//!
//! Overall percent bands: preparing 0-5, extracting 5-10, downloading
//! 10-80, uploading 80-99, finalizing 99-100.

use vget_models::Stage;

pub const PREPARING_END: f64 = 5.0;
pub const EXTRACTING_END: f64 = 10.0;
pub const DOWNLOADING_END: f64 = 80.0;
pub const UPLOADING_END: f64 = 99.0;

/// Overall percent for a raw download percent in [0, 100].
pub fn download_progress(raw_percent: f64) -> f64 {
    let span = DOWNLOADING_END - EXTRACTING_END;
    EXTRACTING_END + raw_percent.clamp(0.0, 100.0) / 100.0 * span
}

/// Overall percent while uploading artifact `index` of `total`.
pub fn upload_progress(index: usize, total: usize) -> f64 {
    if total == 0 {
        return UPLOADING_END;
    }
    let span = UPLOADING_END - DOWNLOADING_END;
    DOWNLOADING_END + (index as f64 / total as f64) * span
}

/// Stage a given overall percent falls into.
pub fn stage_for(percent: f64) -> Stage {
    if percent < PREPARING_END {
        Stage::Preparing
    } else if percent < EXTRACTING_END {
        Stage::Extracting
    } else if percent < DOWNLOADING_END {
        Stage::Downloading
    } else if percent < UPLOADING_END {
        Stage::Uploading
    } else {
        Stage::Finalizing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_band_is_10_to_80() {
        assert_eq!(download_progress(0.0), 10.0);
        assert_eq!(download_progress(50.0), 45.0);
        assert_eq!(download_progress(100.0), 80.0);
        assert_eq!(download_progress(250.0), 80.0);
    }

    #[test]
    fn upload_band_is_80_to_99() {
        assert_eq!(upload_progress(0, 4), 80.0);
        assert!((upload_progress(2, 4) - 89.5).abs() < 0.01);
        assert_eq!(upload_progress(0, 0), 99.0);
    }

    #[test]
    fn stages_cover_the_scale() {
        assert_eq!(stage_for(0.0), Stage::Preparing);
        assert_eq!(stage_for(7.0), Stage::Extracting);
        assert_eq!(stage_for(45.0), Stage::Downloading);
        assert_eq!(stage_for(90.0), Stage::Uploading);
        assert_eq!(stage_for(99.5), Stage::Finalizing);
    }
}

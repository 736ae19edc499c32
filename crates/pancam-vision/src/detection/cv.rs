//! OpenCV glue shared by the cascade and neural detectors.

use opencv::core::{Mat, Rect, Vector};
use opencv::imgcodecs;
use opencv::prelude::MatTraitConst;

use crate::error::{VisionError, VisionResult};
use crate::frame::Frame;
use crate::roi::Region;

/// Decode the frame's JPEG with `flags`, cropped to `roi` when given.
pub(crate) fn decode(frame: &Frame, flags: i32, roi: Option<&Region>) -> VisionResult<Mat> {
    if frame.jpeg().is_empty() {
        return Err(VisionError::detection_failed("frame has no JPEG payload"));
    }

    let buf = Vector::<u8>::from_slice(frame.jpeg());
    let mat = imgcodecs::imdecode(&buf, flags)?;
    if mat.empty() {
        return Err(VisionError::detection_failed("imdecode returned an empty image"));
    }

    match roi {
        Some(region) => {
            let r = region.clamp_to(mat.cols() as u32, mat.rows() as u32);
            let rect = Rect::new(r.x as i32, r.y as i32, r.width as i32, r.height as i32);
            let cropped = Mat::roi(&mat, rect)?.try_clone()?;
            Ok(cropped)
        }
        None => Ok(mat),
    }
}

//! 图片预处理与焦点计算

use opencv::core::{self, Mat, Point, Size, Vector};
use opencv::imgcodecs;
use opencv::imgproc;
use opencv::prelude::*;

use crate::error::{Error, Result};

/// 编码器输入尺寸
pub const INPUT_SIZE: i32 = 224;
/// 计算焦点时缩略图的最大边长
const SALIENCY_SIZE: f64 = 64.0;
const JPEG_QUALITY: i32 = 90;

/// 预处理完成、可以交给编码器的图片
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// 缩放到编码器输入尺寸后重新编码的 JPEG
    pub jpeg: Vec<u8>,
    /// 归一化到 [0, 1] 的焦点坐标 `(x, y)`
    pub focal_point: (f32, f32),
}

/// 解码失败说明图片本身损坏，不值得重试
pub fn decode(bytes: &[u8]) -> Result<Mat> {
    let asset = |e: opencv::Error| Error::PermanentAsset(format!("无法解码图片: {e}"));
    let mat = Mat::from_slice(bytes).map_err(asset)?;
    let img = imgcodecs::imdecode(&mat, imgcodecs::IMREAD_COLOR).map_err(asset)?;
    if img.empty() {
        return Err(Error::PermanentAsset("无法解码图片".to_string()));
    }
    Ok(img)
}

pub fn prepare(bytes: &[u8]) -> Result<PreparedImage> {
    let img = decode(bytes)?;
    let focal_point = focal_point(&img)?;

    let mut input = Mat::default();
    imgproc::resize(
        &img,
        &mut input,
        Size::new(INPUT_SIZE, INPUT_SIZE),
        0.0,
        0.0,
        imgproc::INTER_AREA,
    )?;

    let mut buf = Vector::<u8>::new();
    let params = Vector::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, JPEG_QUALITY]);
    imgcodecs::imencode(".jpg", &input, &mut buf, &params)?;
    Ok(PreparedImage { jpeg: buf.to_vec(), focal_point })
}

/// 焦点取梯度能量经过高斯模糊后的峰值位置
///
/// 纯色图片没有明显的焦点，返回图片中心
pub fn focal_point(img: &Mat) -> Result<(f32, f32)> {
    let (w, h) = (img.cols(), img.rows());
    if w == 0 || h == 0 {
        return Ok((0.5, 0.5));
    }

    let gray = if img.channels() == 1 {
        img.try_clone()?
    } else {
        let mut gray = Mat::default();
        imgproc::cvt_color_def(img, &mut gray, imgproc::COLOR_BGR2GRAY)?;
        gray
    };

    let scale = (SALIENCY_SIZE / w.max(h) as f64).min(1.0);
    let mut thumb = Mat::default();
    imgproc::resize(&gray, &mut thumb, Size::default(), scale, scale, imgproc::INTER_AREA)?;

    let mut gx = Mat::default();
    let mut gy = Mat::default();
    imgproc::sobel_def(&thumb, &mut gx, core::CV_32F, 1, 0)?;
    imgproc::sobel_def(&thumb, &mut gy, core::CV_32F, 0, 1)?;
    let mut energy = Mat::default();
    core::magnitude(&gx, &gy, &mut energy)?;

    let mut blurred = Mat::default();
    imgproc::gaussian_blur_def(&energy, &mut blurred, Size::new(0, 0), 3.0)?;

    let mut max = 0.0;
    let mut max_loc = Point::default();
    core::min_max_loc(&blurred, None, Some(&mut max), None, Some(&mut max_loc), &core::no_array())?;
    if max <= 1e-6 {
        return Ok((0.5, 0.5));
    }

    let (tw, th) = (blurred.cols() as f32, blurred.rows() as f32);
    let x = ((max_loc.x as f32 + 0.5) / tw).clamp(0.0, 1.0);
    let y = ((max_loc.y as f32 + 0.5) / th).clamp(0.0, 1.0);
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use opencv::core::{Rect, Scalar};

    use super::*;

    fn canvas(w: i32, h: i32) -> Mat {
        Mat::new_rows_cols_with_default(h, w, core::CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    fn encode_png(img: &Mat) -> Vec<u8> {
        let mut buf = Vector::<u8>::new();
        imgcodecs::imencode(".png", img, &mut buf, &Vector::new()).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_flat_image_centers() {
        assert_eq!(focal_point(&canvas(200, 100)).unwrap(), (0.5, 0.5));
    }

    #[test]
    fn test_focal_point_follows_detail() {
        let mut img = canvas(256, 256);
        imgproc::rectangle(
            &mut img,
            Rect::new(180, 20, 40, 40),
            Scalar::all(255.0),
            -1,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
        let (x, y) = focal_point(&img).unwrap();
        assert!(x > 0.6, "x = {x}");
        assert!(y < 0.4, "y = {y}");
    }

    #[test]
    fn test_prepare_resizes_to_input() {
        let png = encode_png(&canvas(320, 200));
        let prepared = prepare(&png).unwrap();
        let decoded = decode(&prepared.jpeg).unwrap();
        assert_eq!((decoded.cols(), decoded.rows()), (INPUT_SIZE, INPUT_SIZE));
    }

    #[test]
    fn test_garbage_is_permanent() {
        assert!(matches!(prepare(b"not an image"), Err(Error::PermanentAsset(_))));
        assert!(matches!(prepare(b""), Err(Error::PermanentAsset(_))));
    }
}

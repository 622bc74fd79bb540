//! Calorie estimates from food photos.

use base64::{Engine, engine::general_purpose::STANDARD};
use image::{DynamicImage, RgbImage, codecs::jpeg::JpegEncoder, imageops::FilterType};
use serde::Serialize;
use thiserror::Error;

use crate::completion::{
    ChatMessage, Completion, CompletionError, CompletionRequest, CompletionSettings,
};

const MAX_EDGE: u32 = 512;
const JPEG_QUALITY: u8 = 80;

pub const FOOD_PROMPT: &str = "Identify the food in this image and estimate its calories. \
List each item on its own line with its estimated calories, then finish with the total as \
\"<number> calories\".";

#[derive(Error, Debug)]
pub enum FoodError {
    #[error("could not read image: {0}")]
    Image(#[from] image::ImageError),

    #[error("image is not a base64 data URL")]
    InvalidDataUrl,

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("No food analysis found. Please try a clearer image of food.")]
    NoAnalysis,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FoodAnalysis {
    pub description: String,
    pub calories: Option<u32>,
}

/// Shrinks the photo to fit 512x512, flattens transparency onto white and
/// re-encodes it as a JPEG data URL.
pub fn prepare_food_image(bytes: &[u8]) -> Result<String, FoodError> {
    let decoded = image::load_from_memory(bytes)?;
    let (width, height) = fit_within(decoded.width(), decoded.height(), MAX_EDGE);
    let resized = if (width, height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::Triangle)
    };

    let flat = flatten_on_white(&resized);
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&flat)?;

    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg)))
}

/// Decodes a `data:<mime>;base64,<payload>` URL and runs it through
/// [`prepare_food_image`].
pub fn normalize_data_url(data_url: &str) -> Result<String, FoodError> {
    let payload = data_url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .map(|(_, payload)| payload.trim())
        .ok_or(FoodError::InvalidDataUrl)?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|_| FoodError::InvalidDataUrl)?;
    prepare_food_image(&bytes)
}

pub fn food_request(settings: &CompletionSettings, image_url: &str) -> CompletionRequest {
    CompletionRequest {
        model: settings.vision_model.clone(),
        messages: vec![ChatMessage::user_with_image(FOOD_PROMPT, image_url)],
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
    }
}

pub fn identify_food<C: Completion + ?Sized>(
    client: &C,
    settings: &CompletionSettings,
    image_url: &str,
) -> Result<FoodAnalysis, FoodError> {
    log::info!("requesting food analysis ({} byte image)", image_url.len());
    let text = client.complete(&food_request(settings, image_url))?;
    if text.trim().is_empty() {
        return Err(FoodError::NoAnalysis);
    }

    let calories = parse_calories(&text);
    log::info!("food analysis received, calories={calories:?}");
    Ok(FoodAnalysis {
        description: text,
        calories,
    })
}

/// First run of digits followed (after optional whitespace) by "calories".
pub fn parse_calories(text: &str) -> Option<u32> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        if !bytes[start].is_ascii_digit() {
            start += 1;
            continue;
        }
        let end = bytes[start..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map_or(bytes.len(), |offset| start + offset);

        let rest = text[end..].trim_start();
        if rest
            .get(..8)
            .is_some_and(|word| word.eq_ignore_ascii_case("calories"))
        {
            return text[start..end].parse().ok();
        }
        start = end;
    }
    None
}

fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let scale = |long: u32, short: u32| {
        let scaled = (f64::from(short) * f64::from(max_edge) / f64::from(long)).round() as u32;
        scaled.max(1)
    };

    if width > height && width > max_edge {
        (max_edge, scale(width, height))
    } else if height > max_edge {
        (scale(height, width), max_edge)
    } else {
        (width, height)
    }
}

fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgba, RgbaImage};

    use super::*;

    struct Canned(&'static str);

    impl Completion for Canned {
        fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
            Ok(self.0.to_string())
        }
    }

    fn png(width: u32, height: u32, pixel: Rgba<u8>) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, pixel);
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    fn decode_data_url(url: &str) -> DynamicImage {
        let payload = url.strip_prefix("data:image/jpeg;base64,").unwrap();
        image::load_from_memory(&STANDARD.decode(payload).unwrap()).unwrap()
    }

    #[test]
    fn calories_follow_the_first_matching_number() {
        assert_eq!(parse_calories("Pizza slice, about 285 calories."), Some(285));
        assert_eq!(parse_calories("2 slices: 600Calories total"), Some(600));
        assert_eq!(parse_calories("1 apple (95 CALORIES), 1 banana 105 calories"), Some(95));
        assert_eq!(parse_calories("Roughly 300 kcal"), None);
        assert_eq!(parse_calories("calories unknown"), None);
        assert_eq!(parse_calories(""), None);
    }

    #[test]
    fn fit_keeps_aspect_ratio() {
        assert_eq!(fit_within(1024, 512, 512), (512, 256));
        assert_eq!(fit_within(300, 900, 512), (171, 512));
        assert_eq!(fit_within(512, 512, 512), (512, 512));
        assert_eq!(fit_within(200, 100, 512), (200, 100));
    }

    #[test]
    fn large_photo_is_shrunk_and_reencoded() {
        let url = prepare_food_image(&png(1024, 256, Rgba([200, 30, 30, 255]))).unwrap();
        let decoded = decode_data_url(&url);
        assert_eq!((decoded.width(), decoded.height()), (512, 128));
    }

    #[test]
    fn transparency_is_flattened_onto_white() {
        let url = prepare_food_image(&png(16, 16, Rgba([0, 0, 0, 0]))).unwrap();
        let pixel = decode_data_url(&url).to_rgb8().get_pixel(8, 8).0;
        assert!(pixel.iter().all(|&c| c > 245), "got {pixel:?}");
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(matches!(
            prepare_food_image(b"definitely not an image"),
            Err(FoodError::Image(_))
        ));
        assert!(matches!(
            normalize_data_url("http://example.com/a.png"),
            Err(FoodError::InvalidDataUrl)
        ));
        assert!(matches!(
            normalize_data_url("data:image/png;base64,%%%"),
            Err(FoodError::InvalidDataUrl)
        ));
    }

    #[test]
    fn data_url_roundtrips_through_preparation() {
        let url = format!(
            "data:image/png;base64,{}",
            STANDARD.encode(png(40, 20, Rgba([10, 200, 10, 255])))
        );
        let prepared = normalize_data_url(&url).unwrap();
        assert!(prepared.starts_with("data:image/jpeg;base64,"));
        assert_eq!(decode_data_url(&prepared).width(), 40);
    }

    #[test]
    fn analysis_extracts_calories() {
        let analysis = identify_food(
            &Canned("Grilled chicken salad\nTotal: 420 calories"),
            &CompletionSettings::default(),
            "data:image/jpeg;base64,AAAA",
        )
        .unwrap();
        assert_eq!(analysis.calories, Some(420));
        assert!(analysis.description.starts_with("Grilled chicken salad"));
    }

    #[test]
    fn empty_analysis_is_an_error() {
        let err = identify_food(
            &Canned(""),
            &CompletionSettings::default(),
            "data:image/jpeg;base64,AAAA",
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "No food analysis found. Please try a clearer image of food."
        );
    }

    #[test]
    fn request_targets_vision_model() {
        let request = food_request(&CompletionSettings::default(), "data:image/jpeg;base64,AAAA");
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.messages.len(), 1);
    }
}

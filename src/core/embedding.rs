use crate::error::EmbedError;
use image::DynamicImage;
use image::imageops::FilterType;
use image_hasher::{HashAlg, Hasher, HasherConfig};
use std::path::{Path, PathBuf};

const LAYOUT_SIDE: u32 = 16;
const HASH_SIDE: u32 = 16;

/// A feature model turning an image into a fixed-length vector.
pub trait FeatureExtractor {
    fn name(&self) -> &str;
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>, EmbedError>;
}

/// Turns image files into unit-norm embeddings.
pub trait Embedder {
    fn embed(&self, path: &Path) -> Result<Embedding, EmbedError>;
}

/// A unit-length vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Normalize `values` to unit length.
    pub fn new(mut values: Vec<f32>) -> Result<Self, EmbedError> {
        l2_normalize(&mut values)?;
        Ok(Self { values })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn cosine(&self, other: &Embedding) -> f32 {
        cosine_similarity(&self.values, &other.values)
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub path: PathBuf,
    pub embedding: Embedding,
}

pub fn l2_normalize(values: &mut [f32]) -> Result<(), EmbedError> {
    let norm = values
        .iter()
        .map(|&v| v as f64 * v as f64)
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(EmbedError::Degenerate);
    }
    for v in values.iter_mut() {
        *v = (*v as f64 / norm) as f32;
    }
    Ok(())
}

/// Cosine similarity of two vectors. Mismatched lengths and zero vectors
/// yield 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (dot / denom) as f32
    }
}

/// Coarse colour layout: the image squeezed to 16x16 RGB, each channel
/// centred on its own mean so the vector describes arrangement, not exposure.
/// A featureless image maps to a constant vector.
pub struct ColorLayout;

impl FeatureExtractor for ColorLayout {
    fn name(&self) -> &str {
        "color-layout"
    }

    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>, EmbedError> {
        let small = image
            .resize_exact(LAYOUT_SIDE, LAYOUT_SIDE, FilterType::Triangle)
            .to_rgb8();
        let raw = small.as_raw();
        let pixels = (raw.len() / 3).max(1) as f32;

        let mut means = [0.0f32; 3];
        for px in raw.chunks_exact(3) {
            for (mean, &v) in means.iter_mut().zip(px) {
                *mean += v as f32 / 255.0;
            }
        }
        for mean in means.iter_mut() {
            *mean /= pixels;
        }

        let values: Vec<f32> = raw
            .chunks_exact(3)
            .flat_map(|px| px.iter().zip(means).map(|(&v, mean)| v as f32 / 255.0 - mean))
            .collect();
        if values.iter().all(|v| v.abs() < f32::EPSILON) {
            return Ok(vec![1.0; values.len()]);
        }
        Ok(values)
    }
}

/// Gradient perceptual hash with each bit mapped to +1 or -1.
pub struct StructureHash {
    hasher: Hasher,
}

impl StructureHash {
    pub fn new() -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(HASH_SIDE, HASH_SIDE)
            .to_hasher();
        Self { hasher }
    }
}

impl Default for StructureHash {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor for StructureHash {
    fn name(&self) -> &str {
        "structure-hash"
    }

    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>, EmbedError> {
        let hash = self.hasher.hash_image(image);
        let bytes = hash.as_bytes();
        if bytes.is_empty() {
            return Err(EmbedError::Extractor {
                model: self.name().to_string(),
                message: "empty hash".to_string(),
            });
        }
        Ok(bytes
            .iter()
            .flat_map(|&byte| {
                (0..8).map(move |bit| if (byte >> (7 - bit)) & 1 == 1 { 1.0 } else { -1.0 })
            })
            .collect())
    }
}

/// Concatenates two independently normalized embeddings and normalizes the
/// result, so both models weigh equally in cosine similarity.
pub struct DualEmbedder {
    first: Box<dyn FeatureExtractor>,
    second: Box<dyn FeatureExtractor>,
}

impl DualEmbedder {
    pub fn new(first: Box<dyn FeatureExtractor>, second: Box<dyn FeatureExtractor>) -> Self {
        Self { first, second }
    }

    pub fn standard() -> Self {
        Self::new(Box::new(ColorLayout), Box::new(StructureHash::new()))
    }

    pub fn embed_image(&self, image: &DynamicImage) -> Result<Embedding, EmbedError> {
        let first = component(self.first.as_ref(), image)?;
        let second = component(self.second.as_ref(), image)?;
        let mut combined = first;
        combined.extend(second);
        Embedding::new(combined)
    }
}

fn component(extractor: &dyn FeatureExtractor, image: &DynamicImage) -> Result<Vec<f32>, EmbedError> {
    let mut values = extractor.embed(image)?;
    l2_normalize(&mut values).map_err(|_| EmbedError::Extractor {
        model: extractor.name().to_string(),
        message: "zero-length embedding".to_string(),
    })?;
    Ok(values)
}

impl Embedder for DualEmbedder {
    fn embed(&self, path: &Path) -> Result<Embedding, EmbedError> {
        let image = image::open(path).map_err(|source| EmbedError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        self.embed_image(&image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::TempDir;

    struct Fixed(Vec<f32>);

    impl FeatureExtractor for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn embed(&self, _image: &DynamicImage) -> Result<Vec<f32>, EmbedError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl FeatureExtractor for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn embed(&self, _image: &DynamicImage) -> Result<Vec<f32>, EmbedError> {
            Err(EmbedError::Extractor {
                model: "broken".to_string(),
                message: "inference failed".to_string(),
            })
        }
    }

    fn scene(offset: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(96, 64, |x, y| {
            let base = 20 + ((x * 2 + y * 3) % 180) as u8;
            let v = base + offset;
            Rgb([v, 220 - base + offset, (base / 2) + offset])
        }))
    }

    fn norm(values: &[f32]) -> f32 {
        values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    #[test]
    fn normalize_produces_unit_vectors() {
        let mut values = vec![3.0f32, 4.0];
        l2_normalize(&mut values).unwrap();
        assert!((values[0] - 0.6).abs() < 1e-6);
        assert!((values[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_rejects_degenerate_vectors() {
        assert!(matches!(
            l2_normalize(&mut [0.0f32, 0.0]),
            Err(EmbedError::Degenerate)
        ));
        assert!(matches!(
            l2_normalize(&mut [f32::NAN, 1.0f32]),
            Err(EmbedError::Degenerate)
        ));
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn components_are_normalized_before_concatenation() {
        let embedder = DualEmbedder::new(
            Box::new(Fixed(vec![3.0, 4.0])),
            Box::new(Fixed(vec![0.0, 5.0])),
        );
        let embedding = embedder.embed_image(&scene(0)).unwrap();
        let half = std::f32::consts::FRAC_1_SQRT_2;
        let expected = [0.6 * half, 0.8 * half, 0.0, half];
        for (got, want) in embedding.as_slice().iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{} != {}", got, want);
        }
    }

    #[test]
    fn failure_in_either_model_fails_the_image() {
        let image = scene(0);
        let first_broken = DualEmbedder::new(Box::new(Broken), Box::new(Fixed(vec![1.0])));
        assert!(first_broken.embed_image(&image).is_err());

        let second_broken = DualEmbedder::new(Box::new(Fixed(vec![1.0])), Box::new(Broken));
        assert!(second_broken.embed_image(&image).is_err());

        let zero = DualEmbedder::new(Box::new(Fixed(vec![0.0])), Box::new(Fixed(vec![1.0])));
        assert!(matches!(
            zero.embed_image(&image),
            Err(EmbedError::Extractor { .. })
        ));
    }

    #[test]
    fn standard_embedding_is_unit_length() {
        let embedding = DualEmbedder::standard().embed_image(&scene(0)).unwrap();
        let layout_dims = (LAYOUT_SIDE * LAYOUT_SIDE * 3) as usize;
        assert!(embedding.len() > layout_dims);
        assert!((norm(embedding.as_slice()) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn near_identical_images_are_highly_similar() {
        let embedder = DualEmbedder::standard();
        let a = embedder.embed_image(&scene(0)).unwrap();
        let b = embedder.embed_image(&scene(6)).unwrap();
        assert!(a.cosine(&a) > 0.9999);
        assert!(a.cosine(&b) > 0.9, "similarity was {}", a.cosine(&b));
    }

    fn triangle(t: u32, period: u32) -> f32 {
        let t = t % period;
        t.min(period - t) as f32 * 2.0 / period as f32
    }

    /// Dark room with a lit window top-left and soft vertical banding.
    fn night_window() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(96, 64, |x, y| {
            if x < 30 && y < 22 {
                return Rgb([210, 190, 130]);
            }
            let v = (10.0 + 16.0 * triangle(x, 24)) as u8;
            Rgb([v, v, v + 6])
        }))
    }

    /// Dark street with light streaks bottom-right and horizontal banding.
    fn night_streaks() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(96, 64, |x, y| {
            if x >= 48 && y >= 32 && (x + y) % 12 < 4 {
                return Rgb([170, 175, 190]);
            }
            let v = (12.0 + 16.0 * triangle(y, 20)) as u8;
            Rgb([v + 4, v, v])
        }))
    }

    #[test]
    fn color_layout_ignores_overall_exposure() {
        let layout = ColorLayout;
        let a = layout.embed(&night_window()).unwrap();
        let b = layout.embed(&night_streaks()).unwrap();
        let similarity = cosine_similarity(&a, &b);
        assert!(similarity < 0.25, "colour layout similarity was {}", similarity);

        let dim = layout.embed(&scene(0)).unwrap();
        let bright = layout.embed(&scene(30)).unwrap();
        assert!(cosine_similarity(&dim, &bright) > 0.95);
    }

    #[test]
    fn unrelated_dark_images_stay_apart_at_default_threshold() {
        use crate::config::DEFAULT_SIMILARITY_THRESHOLD;
        use crate::core::grouping::group_by_anchor;

        let embedder = DualEmbedder::standard();
        let images = vec![
            EmbeddedImage {
                path: PathBuf::from("window.png"),
                embedding: embedder.embed_image(&night_window()).unwrap(),
            },
            EmbeddedImage {
                path: PathBuf::from("streaks.png"),
                embedding: embedder.embed_image(&night_streaks()).unwrap(),
            },
        ];
        let similarity = images[0].embedding.cosine(&images[1].embedding);
        assert!(
            similarity <= DEFAULT_SIMILARITY_THRESHOLD,
            "combined similarity was {}",
            similarity
        );
        assert_eq!(group_by_anchor(&images, DEFAULT_SIMILARITY_THRESHOLD).len(), 2);
    }

    #[test]
    fn featureless_images_still_embed() {
        let grey = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([90, 90, 90])));
        let values = ColorLayout.embed(&grey).unwrap();
        assert!(values.iter().all(|&v| v == 1.0));
        assert!(DualEmbedder::standard().embed_image(&grey).is_ok());
    }

    #[test]
    fn embed_reads_files_and_reports_load_failures() {
        let temp_dir = TempDir::new().unwrap();
        let good = temp_dir.path().join("scene.png");
        scene(0).save(&good).unwrap();
        let bad = temp_dir.path().join("bad.png");
        fs::write(&bad, b"nope").unwrap();

        let embedder = DualEmbedder::standard();
        assert!(embedder.embed(&good).is_ok());
        assert!(matches!(
            embedder.embed(&bad),
            Err(EmbedError::Load { .. })
        ));
    }
}

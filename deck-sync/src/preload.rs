use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, Instrument};

use crate::{
    ActionKind, AdmissionLimiter, Image, ImageFetcher, Presentation, SlideAction, SyncError,
    SyncResult,
};

/// Current images of one slide, in the order they appear on the slide
#[derive(Debug, Clone, Default)]
pub struct PreloadedSlide {
    images: Vec<Image>,
    object_ids: Vec<String>,
}

impl PreloadedSlide {
    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Object id of the page element this image was read from
    pub fn object_id_for(&self, image: &Image) -> Option<&str> {
        self.images
            .iter()
            .position(|current| current.same_instance(image))
            .map(|pos| self.object_ids[pos].as_str())
    }

    /// First current image equivalent to `image`, with its object id
    pub fn find_equivalent(&self, image: &Image) -> Option<(&Image, &str)> {
        self.iter().find(|(current, _)| current.equivalent(image))
    }

    pub fn contains_equivalent(&self, image: &Image) -> bool {
        self.find_equivalent(image).is_some()
    }

    /// `(image, object id)` pairs by position
    pub fn iter(&self) -> impl Iterator<Item = (&Image, &str)> {
        self.images
            .iter()
            .zip(self.object_ids.iter().map(String::as_str))
    }
}

/// Current images of every slide about to be updated, keyed by slide index
#[derive(Debug, Clone, Default)]
pub struct PreloadSnapshot {
    slides: BTreeMap<usize, PreloadedSlide>,
}

impl PreloadSnapshot {
    pub fn get(&self, slide_index: usize) -> Option<&PreloadedSlide> {
        self.slides.get(&slide_index)
    }

    /// Number of slides with preloaded images
    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    /// Total number of preloaded images
    pub fn image_count(&self) -> usize {
        self.slides.values().map(PreloadedSlide::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &PreloadedSlide)> {
        self.slides.iter().map(|(index, slide)| (*index, slide))
    }
}

/// An image to fetch, tagged with where its result belongs
#[derive(Debug, Clone)]
struct PreloadTarget {
    slide_index: usize,
    position: usize,
    source: String,
    object_id: String,
    from_markdown: bool,
    link: Option<String>,
}

/// Output of one fetch task; never shared between tasks
struct PreloadedImage {
    slide_index: usize,
    position: usize,
    image: Image,
    object_id: String,
}

/// Fetches the current images of slides that are about to be updated
pub struct Preloader {
    fetcher: Arc<dyn ImageFetcher>,
    limiter: AdmissionLimiter,
}

impl Preloader {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, limit: usize) -> Self {
        Self {
            fetcher,
            limiter: AdmissionLimiter::new(limit),
        }
    }

    /// The stage's admission limiter
    pub fn limiter(&self) -> &AdmissionLimiter {
        &self.limiter
    }

    /// Fetch every current image of every `Update` target.
    ///
    /// All or nothing: the first failed fetch cancels the rest and the call
    /// returns one aggregated error without a snapshot.
    #[instrument(skip_all, fields(actions = actions.len()))]
    pub async fn preload(
        &self,
        presentation: &Presentation,
        actions: &[SlideAction],
        cancel: &CancellationToken,
    ) -> SyncResult<PreloadSnapshot> {
        let targets = collect_targets(presentation, actions);
        if targets.is_empty() {
            return Ok(PreloadSnapshot::default());
        }

        let expected = targets.len();
        info!(count = expected, "Preloading current images");

        let scope = cancel.child_token();
        let mut tasks = JoinSet::new();
        for target in targets {
            let fetcher = self.fetcher.clone();
            let limiter = self.limiter.clone();
            let scope = scope.clone();
            tasks.spawn(
                async move {
                    let result = fetch_target(fetcher.as_ref(), &limiter, &scope, target).await;
                    if result.is_err() {
                        scope.cancel();
                    }
                    result
                }
                .in_current_span(),
            );
        }

        let mut loaded = Vec::with_capacity(expected);
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(image)) => loaded.push(image),
                // Casualty of a cancelled scope, not a failure of its own
                Ok(Err(SyncError::Cancelled)) => {}
                Ok(Err(e)) => failures.push(e),
                Err(e) => {
                    scope.cancel();
                    failures.push(e.into());
                }
            }
        }

        if let Some(err) = SyncError::preload(failures) {
            error!(error = %err, "Failed to preload images");
            return Err(err);
        }
        if cancel.is_cancelled() || loaded.len() != expected {
            return Err(SyncError::Cancelled);
        }

        let snapshot = merge(loaded)?;
        info!(slides = snapshot.len(), images = snapshot.image_count(), "Preloaded current images");
        Ok(snapshot)
    }
}

/// Images of `Update` targets that have content to fetch, in slide order.
///
/// Positions count only fetchable images, so they match the order of the
/// slide's current images as the diff sees them.
fn collect_targets(presentation: &Presentation, actions: &[SlideAction]) -> Vec<PreloadTarget> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for action in actions {
        if action.kind != ActionKind::Update || !seen.insert(action.index) {
            continue;
        }
        let Some(page) = presentation.slides.get(action.index) else {
            continue;
        };

        let fetchable = page
            .elements
            .iter()
            .filter_map(|element| element.fetchable_image().map(|img| (element, img)));
        for (position, (element, img)) in fetchable.enumerate() {
            let Some(source) = img.content_url.clone() else {
                continue;
            };
            targets.push(PreloadTarget {
                slide_index: action.index,
                position,
                source,
                object_id: element.object_id.clone(),
                from_markdown: element.is_from_markdown(),
                link: img.link.clone(),
            });
        }
    }

    targets
}

async fn fetch_target(
    fetcher: &dyn ImageFetcher,
    limiter: &AdmissionLimiter,
    scope: &CancellationToken,
    target: PreloadTarget,
) -> SyncResult<PreloadedImage> {
    let _permit = limiter.acquire(scope).await?;

    let load = async {
        if target.from_markdown {
            Image::load_from_markdown(fetcher, &target.source).await
        } else {
            Image::load(fetcher, &target.source).await
        }
    };

    // In-flight fetches stop as soon as a sibling fails
    let image = tokio::select! {
        biased;
        _ = scope.cancelled() => return Err(SyncError::Cancelled),
        image = load => image?,
    };
    debug!(slide = target.slide_index, position = target.position, source = %target.source, "Preloaded image");

    Ok(PreloadedImage {
        slide_index: target.slide_index,
        position: target.position,
        image: image.with_link(target.link),
        object_id: target.object_id,
    })
}

/// Place every result at its recorded slot. Runs after all tasks finished.
fn merge(loaded: Vec<PreloadedImage>) -> SyncResult<PreloadSnapshot> {
    let mut slots: BTreeMap<usize, Vec<Option<(Image, String)>>> = BTreeMap::new();
    for item in loaded {
        let slide = slots.entry(item.slide_index).or_default();
        if slide.len() <= item.position {
            slide.resize_with(item.position + 1, || None);
        }
        slide[item.position] = Some((item.image, item.object_id));
    }

    let mut slides = BTreeMap::new();
    for (index, slide_slots) in slots {
        let mut preloaded = PreloadedSlide::default();
        for (position, slot) in slide_slots.into_iter().enumerate() {
            let (image, object_id) = slot.ok_or_else(|| {
                SyncError::Task(format!(
                    "slide {} is missing preloaded image {}",
                    index, position
                ))
            })?;
            preloaded.images.push(image);
            preloaded.object_ids.push(object_id);
        }
        slides.insert(index, preloaded);
    }

    Ok(PreloadSnapshot { slides })
}

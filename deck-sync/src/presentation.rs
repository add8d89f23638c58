use serde::{Deserialize, Serialize};

use crate::Image;

/// Element description marking an image that was inserted from markdown
pub const MARKDOWN_IMAGE_DESCRIPTION: &str = "Image generated from markdown";

/// The live document as last read from the editing service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub slides: Vec<Page>,
}

/// One slide of the live document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default)]
    pub object_id: String,
    #[serde(default)]
    pub elements: Vec<PageElement>,
}

/// A shape, table, image or other object placed on a slide
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageElement {
    pub object_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbeddedImage>,
}

/// Image properties of a page element
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedImage {
    /// Where the editing service serves the current content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    /// Layout placeholder with no content of its own
    #[serde(default)]
    pub placeholder: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl PageElement {
    /// Image of this element if it has content that can be fetched
    pub fn fetchable_image(&self) -> Option<&EmbeddedImage> {
        self.image
            .as_ref()
            .filter(|img| !img.placeholder)
            .filter(|img| img.content_url.as_deref().is_some_and(|u| !u.is_empty()))
    }

    pub fn is_from_markdown(&self) -> bool {
        self.description.as_deref() == Some(MARKDOWN_IMAGE_DESCRIPTION)
    }
}

/// Kind of pending edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Rewrite an existing slide in place
    Update,
    /// Add a slide at the end
    Append,
    /// Add a slide before an existing one
    Insert,
    Move,
    Delete,
}

/// Desired content of a slide, produced by the document compiler
#[derive(Debug, Clone, Default)]
pub struct Slide {
    pub layout: String,
    pub images: Vec<Image>,
}

impl Slide {
    pub fn new<S: Into<String>>(layout: S) -> Self {
        Self {
            layout: layout.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, image: Image) -> Self {
        self.images.push(image);
        self
    }
}

/// A pending edit queued before it is applied to the live document
#[derive(Debug, Clone)]
pub struct SlideAction {
    /// Index of the targeted slide
    pub index: usize,
    pub kind: ActionKind,
    pub slide: Option<Slide>,
}

impl SlideAction {
    pub fn update(index: usize, slide: Slide) -> Self {
        Self {
            index,
            kind: ActionKind::Update,
            slide: Some(slide),
        }
    }

    pub fn append(index: usize, slide: Slide) -> Self {
        Self {
            index,
            kind: ActionKind::Append,
            slide: Some(slide),
        }
    }

    pub fn delete(index: usize) -> Self {
        Self {
            index,
            kind: ActionKind::Delete,
            slide: None,
        }
    }

    /// Whether the desired slide's images may have to be uploaded
    pub fn carries_new_content(&self) -> bool {
        matches!(self.kind, ActionKind::Update | ActionKind::Append)
    }
}

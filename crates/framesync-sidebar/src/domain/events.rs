//! Method vocabularies for every channel the sidebar takes part in.
//!
//! Each channel direction gets its own enum.  The enum names read
//! `<caller>To<handler>`: `GuestToSidebar` lists the methods a guest invokes
//! and the sidebar handles, `SidebarToGuest` the reverse.
//!
//! # Why one enum per direction? (for beginners)
//!
//! A method name is only meaningful to the side that registered a handler for
//! it.  Splitting the vocabularies lets the compiler reject, say, a sidebar
//! trying to `call` a method that only the sidebar itself handles.  On the
//! wire they are still plain strings, and names a receiver does not know are
//! dropped by `PortRpc`, so either side can be upgraded first.

use framesync_core::{RpcMethod, CLOSE_METHOD};

/// Declares a `Copy` method enum and its [`RpcMethod`] impl from
/// `Variant => "wireName"` pairs.
macro_rules! rpc_methods {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl RpcMethod for $name {
            const ALL: &'static [Self] = &[$( Self::$variant ),+];

            fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $wire ),+
                }
            }
        }
    };
}

// ── Host ↔ sidebar ────────────────────────────────────────────────────────────

rpc_methods! {
    /// Calls the host page makes on the sidebar.
    pub enum HostToSidebar {
        /// The host page is going away.
        Close => CLOSE_METHOD,
        /// The sidebar panel became visible.
        SidebarOpened => "sidebarOpened",
        /// The user toggled highlight visibility from the host toolbar.
        SetHighlightsVisible => "setHighlightsVisible",
    }
}

rpc_methods! {
    /// Calls the sidebar makes on the host page.
    pub enum SidebarToHost {
        OpenSidebar => "openSidebar",
        CloseSidebar => "closeSidebar",
        ShowHighlights => "showHighlights",
        FeatureFlagsUpdated => "featureFlagsUpdated",
        LoginRequested => "loginRequested",
        LogoutRequested => "logoutRequested",
        SignupRequested => "signupRequested",
        HelpRequested => "helpRequested",
        PublicAnnotationCountChanged => "publicAnnotationCountChanged",
    }
}

// ── Guest ↔ sidebar ───────────────────────────────────────────────────────────

rpc_methods! {
    /// Calls a guest content frame makes on the sidebar.
    pub enum GuestToSidebar {
        /// The guest frame is unloading.
        Close => CLOSE_METHOD,
        /// The guest's document URI or metadata changed; args: `[DocumentInfo]`.
        DocumentInfoChanged => "documentInfoChanged",
        /// The user selected text and asked for a new annotation.
        CreateAnnotation => "createAnnotation",
        /// Show these annotation tags in the sidebar.
        ShowAnnotations => "showAnnotations",
        FocusAnnotations => "focusAnnotations",
        ToggleAnnotationSelection => "toggleAnnotationSelection",
        OpenSidebar => "openSidebar",
        CloseSidebar => "closeSidebar",
    }
}

rpc_methods! {
    /// Calls the sidebar makes on a guest content frame.
    ///
    /// Guests may run untrusted script, so every payload here carries tags and
    /// selectors only, never annotation bodies.
    pub enum SidebarToGuest {
        /// args: `[[GuestAnnotation, ...]]`
        LoadAnnotations => "loadAnnotations",
        DeleteAnnotations => "deleteAnnotations",
        ScrollToAnnotation => "scrollToAnnotation",
        HoverAnnotations => "hoverAnnotations",
        SetHighlightsVisible => "setHighlightsVisible",
        FeatureFlagsUpdated => "featureFlagsUpdated",
        SidebarOpened => "sidebarOpened",
    }
}

// ── Site ↔ sidebar ────────────────────────────────────────────────────────────

rpc_methods! {
    /// Calls a site frame (e.g. an embedded video player) makes on the sidebar.
    pub enum SiteToSidebar {
        Close => CLOSE_METHOD,
        /// Playback position moved; args: `[seconds]`.
        MediaTimeChanged => "mediaTimeChanged",
    }
}

rpc_methods! {
    pub enum SidebarToSite {
        /// Seek playback; args: `[seconds]`.
        SeekTo => "seekTo",
    }
}

// ── Extension ↔ sidebar ───────────────────────────────────────────────────────

rpc_methods! {
    pub enum ExtensionToSidebar {
        Close => CLOSE_METHOD,
        ToggleRecording => "toggleRecording",
    }
}

rpc_methods! {
    pub enum SidebarToExtension {
        /// args: `[bool]`.  Also sent as the first call when the channel connects.
        RecordingStateChanged => "recordingStateChanged",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_unique_names<M: RpcMethod>() {
        let mut names: Vec<_> = M::ALL.iter().map(|m| m.as_str()).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total, "duplicate wire name in {:?}", M::ALL);
    }

    #[test]
    fn test_wire_names_are_unique_per_vocabulary() {
        assert_unique_names::<HostToSidebar>();
        assert_unique_names::<SidebarToHost>();
        assert_unique_names::<GuestToSidebar>();
        assert_unique_names::<SidebarToGuest>();
        assert_unique_names::<SiteToSidebar>();
        assert_unique_names::<SidebarToSite>();
        assert_unique_names::<ExtensionToSidebar>();
        assert_unique_names::<SidebarToExtension>();
    }

    #[test]
    fn test_every_inbound_vocabulary_handles_close() {
        assert_eq!(HostToSidebar::parse("close"), Some(HostToSidebar::Close));
        assert_eq!(GuestToSidebar::parse("close"), Some(GuestToSidebar::Close));
        assert_eq!(SiteToSidebar::parse("close"), Some(SiteToSidebar::Close));
        assert_eq!(ExtensionToSidebar::parse("close"), Some(ExtensionToSidebar::Close));
    }

    #[test]
    fn test_parse_maps_wire_names_back() {
        assert_eq!(
            GuestToSidebar::parse("documentInfoChanged"),
            Some(GuestToSidebar::DocumentInfoChanged)
        );
        assert_eq!(SidebarToGuest::LoadAnnotations.as_str(), "loadAnnotations");
        assert_eq!(GuestToSidebar::parse("loadAnnotations"), None, "wrong direction");
        assert_eq!(SidebarToExtension::parse("nope"), None);
    }
}

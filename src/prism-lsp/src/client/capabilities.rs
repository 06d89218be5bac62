//! Server capability caching.
//!
//! The initialize reply is flattened into plain booleans once; the
//! capability set is immutable for the life of the client.

use lsp_types::{InitializeResult, OneOf};

/// Capabilities reported by the server, checked before every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachedServerCapabilities {
    pub hover: bool,
    pub definition: bool,
    pub type_definition: bool,
    pub references: bool,
    pub implementation: bool,
    pub document_symbol: bool,
    pub workspace_symbol: bool,
    pub completion: bool,
    pub signature_help: bool,
    pub rename: bool,
    /// Servers may advertise rename without prepareRename; callers then
    /// skip the prepare step instead of failing.
    pub prepare_rename: bool,
    pub formatting: bool,
    pub code_action: bool,
    pub call_hierarchy: bool,
    pub type_hierarchy: bool,
}

impl CachedServerCapabilities {
    pub fn from_initialize_result(result: &InitializeResult) -> Self {
        let caps = &result.capabilities;
        let (rename, prepare_rename) = match &caps.rename_provider {
            Some(OneOf::Left(enabled)) => (*enabled, false),
            Some(OneOf::Right(options)) => (true, options.prepare_provider.unwrap_or(false)),
            None => (false, false),
        };
        Self {
            hover: caps.hover_provider.is_some(),
            definition: caps.definition_provider.is_some(),
            type_definition: caps.type_definition_provider.is_some(),
            references: caps.references_provider.is_some(),
            implementation: caps.implementation_provider.is_some(),
            document_symbol: caps.document_symbol_provider.is_some(),
            workspace_symbol: caps.workspace_symbol_provider.is_some(),
            completion: caps.completion_provider.is_some(),
            signature_help: caps.signature_help_provider.is_some(),
            rename,
            prepare_rename,
            formatting: caps.document_formatting_provider.is_some(),
            code_action: caps.code_action_provider.is_some(),
            call_hierarchy: caps.call_hierarchy_provider.is_some(),
            type_hierarchy: caps.type_hierarchy_provider.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{RenameOptions, ServerCapabilities};

    #[test]
    fn rename_options_expose_prepare_support() {
        let result = InitializeResult {
            capabilities: ServerCapabilities {
                rename_provider: Some(OneOf::Right(RenameOptions {
                    prepare_provider: Some(true),
                    work_done_progress_options: Default::default(),
                })),
                ..Default::default()
            },
            ..Default::default()
        };
        let caps = CachedServerCapabilities::from_initialize_result(&result);
        assert!(caps.rename);
        assert!(caps.prepare_rename);
    }

    #[test]
    fn bare_rename_flag_means_no_prepare() {
        let result = InitializeResult {
            capabilities: ServerCapabilities {
                rename_provider: Some(OneOf::Left(true)),
                ..Default::default()
            },
            ..Default::default()
        };
        let caps = CachedServerCapabilities::from_initialize_result(&result);
        assert!(caps.rename);
        assert!(!caps.prepare_rename);
        assert!(!caps.hover);
    }
}

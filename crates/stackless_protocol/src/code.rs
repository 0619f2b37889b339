//! Platform error codes returned in place of a success payload.

use std::fmt;

macro_rules! error_codes {
    ($($variant:ident = $value:literal => $name:literal,)+) => {
        /// Structured platform failure reported by the server.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ErrorCode {
            $(
                #[doc = $name]
                $variant,
            )+
            /// A code this client does not know.
            Unknown(u32),
        }

        impl ErrorCode {
            /// Maps a wire number to a code.
            pub fn from_u32(value: u32) -> Self {
                match value {
                    $($value => Self::$variant,)+
                    other => Self::Unknown(other),
                }
            }

            /// Wire number of the code.
            pub fn as_u32(self) -> u32 {
                match self {
                    $(Self::$variant => $value,)+
                    Self::Unknown(other) => other,
                }
            }

            /// Canonical name, as used in server logs.
            pub fn name(self) -> String {
                match self {
                    $(Self::$variant => $name.to_string(),)+
                    Self::Unknown(other) => format!("InternalError({other})"),
                }
            }
        }
    };
}

error_codes! {
    Ok = 1 => "Ok",
    InvalidRequest = 2 => "InvalidRequest",
    InvalidLogContext = 3 => "InvalidLogContext",
    ScriptEngineClassNotFound = 4 => "ScriptEngine_ClassNotFound",
    ScriptEngineMethodNotFound = 5 => "ScriptEngine_MethodNotFound",
    ScriptEngineNoCode = 6 => "ScriptEngine_NoCode",
    ScriptEngineBadFileId = 7 => "ScriptEngine_BadFileId",
    ScriptEngineFailedToCompileModule = 8 => "ScriptEngine_FailedToCompileModuleUnknownReason",
    ScriptEngineFailedToInstantiateModule = 9 => "ScriptEngine_FailedToInstanciateModuleUnknownReason",
    ScriptEngineFailedToEvaluateModule = 10 => "ScriptEngine_FailedToEvaluateModuleUnknownReason",
    ScriptEngineUnableToGetMethod = 11 => "ScriptEngine_UnableToGetMethod",
    ScriptEngineMethodNotAFunction = 12 => "ScriptEngine_UnableToGetMethodBecauseItWasNotAFunction",
    ScriptEngineUnableToCallMethod = 13 => "ScriptEngine_UnableToCallMethod",
    ScriptEngineUnknownFunctionCallFailure = 14 => "ScriptEngine_UnknownFunctionCallFailure",
    ScriptEngineDuplicateModuleName = 15 => "ScriptEngine_DuplicateModuleName",
    ScriptEngineUnsupportedValueType = 16 => "ScriptEngine_UnsupportedValueType",
    ScriptEngineUnableToSetArrayValue = 17 => "ScriptEngine_UnableToSetArrayValue",
    ScriptEngineUnableToSetObjectValue = 18 => "ScriptEngine_UnableToSetObjectValue",
    DatastoreUnsavedChanges = 19 => "Datastore_UnsavedChanges",
    DatastoreTypeMismatch = 20 => "Datastore_TypeMismatch",
    DatastoreObjectDeleted = 21 => "Datastore_ObjectDeleted",
    DatastoreWriteConflictTryAgain = 22 => "Datastore_WriteConflictTryAgain",
    DatastoreObjectNotFound = 23 => "Datastore_ObjectNotFound",
    DatastoreUnknown = 24 => "Datastore_Unknown",
    DatastoreMustGetLatestObject = 25 => "Datastore_MustGetLatestObject",
    DatastoreDuplicateObject = 26 => "Datastore_DuplicateObject",
    DatastoreClientHasVersionInvalid = 29 => "Datastore_ClientHasVersionInvalid",
    DatastoreMustGetLatestNamespace = 31 => "Datastore_MustGetLatestWarp",
    DatastoreEngineSourceCorrupted = 32 => "Datastore_EngineSourceCorrupted",
    DatastoreNamespaceIndexNotFound = 33 => "Datastore_WarpIndexNotFound",
    DatastoreEngineSourceNotFound = 34 => "Datastore_EngineSourceNotFound",
    DatastoreUnableToOpen = 35 => "Datastore_UnableToOpen",
    DatastoreUnableToCreateDirectory = 36 => "Datastore_UnableToCreateDirectory",
    DatastoreUnknownSystemError = 37 => "Datastore_UnknownSystemError",
    DatastoreDeletedFlagExists = 38 => "Datastore_DeletedFlagExists",
    DatastoreDeletedFileExists = 39 => "Datastore_DeletedFileExists",
    DatastoreNamespaceVersionCorrupted = 40 => "Datastore_WarpVersionCorrupted",
    DatastoreFailedToSetInitialNamespaceVersion = 41 => "Datastore_FailedToSetInitialWarpVersion",
    ValidatorClientMustUpgrade = 44 => "Validator_ClientMustUpgrade",
    ValidatorInvalidPayload = 45 => "Validator_InvalidFlatbuffer",
    ValidatorForbidden = 46 => "Validator_Forbidden",
    ValidatorPrimaryKeyTooLarge = 47 => "Validator_PrimaryKeyTooLarge",
    ValidatorPrimaryKeyTooSmall = 48 => "Validator_PrimaryKeyTooSmall",
    ValidatorInvalidRequest = 49 => "Validator_InvalidRequest",
    GatewayConnectionFault = 52 => "Innerspace_ConnectionFault",
    GatewayRequestTooLarge = 53 => "Innerspace_RequestTooLarge",
    GatewayShutdown = 54 => "Innerspace_Shutdown",
    GatewayUnableToResolveHostPort = 55 => "Innerspace_UnableToResolveHostPort",
    GatewayNoEndpoints = 56 => "Innerspace_NoEndpoints",
    LauncherTimedOut = 58 => "Launcher_TimedOutWhileGettingWarpSpace",
    LauncherFailedToSpawn = 59 => "Launcher_FailedToSpawnWarpSpace",
    NamespaceDeleted = 61 => "WarpSpace_WarpDeleted",
}

impl ErrorCode {
    /// Whether the client must reload the namespace before retrying.
    pub fn is_stale_client(self) -> bool {
        matches!(
            self,
            Self::DatastoreMustGetLatestNamespace | Self::ValidatorClientMustUpgrade
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_both_ways() {
        let code = ErrorCode::from_u32(21);
        assert_eq!(code, ErrorCode::DatastoreObjectDeleted);
        assert_eq!(code.as_u32(), 21);
        assert_eq!(code.name(), "Datastore_ObjectDeleted");
    }

    #[test]
    fn gaps_are_unknown() {
        let code = ErrorCode::from_u32(27);
        assert_eq!(code, ErrorCode::Unknown(27));
        assert_eq!(code.name(), "InternalError(27)");
        assert_eq!(code.as_u32(), 27);
    }

    #[test]
    fn display_includes_number() {
        assert_eq!(
            ErrorCode::DatastoreWriteConflictTryAgain.to_string(),
            "Datastore_WriteConflictTryAgain (22)"
        );
    }
}

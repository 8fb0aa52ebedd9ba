use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Primitive kind of a request parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Lower-cased on ingestion
    String,
    /// Passed through unchanged
    CaseSensitiveString,
    Integer,
    Float,
    Boolean,
    Date,
    /// Present-or-absent switch that takes no value
    Flag,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::CaseSensitiveString => "case sensitive string",
            Kind::Integer => "integer",
            Kind::Float => "float",
            Kind::Boolean => "boolean",
            Kind::Date => "date",
            Kind::Flag => "flag",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Kind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Declares the attribute catalog: variant, wire name and kind, defined once.
macro_rules! attributes {
    ($($variant:ident => $name:literal, $kind:ident;)+) => {
        /// Every parameter name the API understands
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Attribute {
            $($variant,)+
        }

        impl Attribute {
            pub const ALL: &'static [Attribute] = &[$(Attribute::$variant,)+];

            /// Name used on the query string and in JSON output
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Attribute::$variant => $name,)+
                }
            }

            pub fn kind(&self) -> Kind {
                match self {
                    $(Attribute::$variant => Kind::$kind,)+
                }
            }
        }

        impl FromStr for Attribute {
            type Err = UnknownAttribute;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Attribute::$variant),)+
                    other => Err(UnknownAttribute(other.to_string())),
                }
            }
        }
    };
}

attributes! {
    UserName => "username", String;
    GroupName => "groupname", String;
    AccountName => "accountname", String;
    UnitName => "unitname", String;
    FullName => "fullname", CaseSensitiveString;
    ResourceName => "resourcename", CaseSensitiveString;
    AlternativeName => "alternativename", String;
    SetName => "setname", String;
    Definition => "definition", String;
    Pattern => "pattern", CaseSensitiveString;
    GroupType => "grouptype", CaseSensitiveString;
    UnitType => "unittype", String;
    ResourceType => "resourcetype", CaseSensitiveString;
    Dn => "dn", CaseSensitiveString;
    UserAttribute => "attribute", String;
    Value => "value", CaseSensitiveString;
    ExternalUsername => "externalusername", String;
    QuotaUnit => "quotaunit", String;
    Path => "path", CaseSensitiveString;
    Shell => "shell", CaseSensitiveString;
    HomeDir => "homedir", CaseSensitiveString;
    Fqan => "fqan", CaseSensitiveString;
    VomsUrl => "vomsurl", String;
    Role => "role", CaseSensitiveString;
    CondorGroup => "condorgroup", String;
    VoName => "voname", String;
    Uid => "uid", Integer;
    Gid => "gid", Integer;
    GroupId => "groupid", Integer;
    DnId => "dnid", Integer;
    FqanId => "fqanid", Integer;
    UnitId => "unitid", Integer;
    SetId => "setid", Integer;
    ResourceId => "compid", Integer;
    Quota => "quota", Float;
    Status => "status", Boolean;
    Primary => "primary", Boolean;
    Required => "required", Boolean;
    Leader => "leader", Boolean;
    GroupAccount => "groupaccount", Boolean;
    Experiment => "experiment", Boolean;
    Suspend => "suspend", Boolean;
    Banned => "banned", Boolean;
    Surplus => "surplus", Boolean;
    InLdap => "inldap", Boolean;
    ExpirationDate => "expirationdate", Date;
    LastUpdated => "lastupdated", Date;
    Help => "help", Flag;
    PasswdMode => "passwdmode", Flag;
    Standalone => "standalone", Flag;
    RemoveGroup => "removegroup", Flag;
    Subject => "subject", String;
    TokenSubject => "tokensubject", String;
    SubjectType => "subjecttype", String;
    Jwt => "jwt", Flag;
    VaultStorageKey => "vaultstoragekey", String;
    ExternalAttribute => "externalattribute", CaseSensitiveString;
    FiscalYear => "fiscalyear", Integer;
    AllocationType => "allocationtype", String;
    AllocationClass => "allocationclass", String;
    OriginalHours => "originalhours", Float;
    AdjustedHours => "adjustedhours", Float;
    UsedHours => "usedhours", Float;
    Comments => "comments", CaseSensitiveString;
    CreateDate => "createdate", Date;
    Accessor => "accessor", CaseSensitiveString;
    AccessorType => "accessortype", String;
    Write => "write", Boolean;
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Attribute {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0} is not a known attribute")]
pub struct UnknownAttribute(pub String);

//! Path splitting and classification.
//!
//! Every dispatcher operation starts here: the path is split on `/` and the
//! resulting components are mapped onto exactly one [`Node`]. Depth picks the
//! shape, component parsing picks the variant:
//!
//! ```text
//! /                       Root
//! /exports                GlobalExports
//! /<address>              SlaveDir
//! /<address>/exports      SlaveExports
//! /<address>/<index>      Register
//! anything else           NoMatch
//! ```
//!
//! Classification is purely syntactic. Whether the slave or register is
//! actually declared is the registry's business.

/// Name of the control file at the root and in every slave directory.
pub const EXPORTS: &str = "exports";

/// Split a path into its non-empty components.
///
/// No normalization beyond delimiter splitting: `.` and `..` are kept as
/// ordinary components and repeated separators collapse naturally.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// A classified filesystem path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    Root,
    GlobalExports,
    SlaveDir(u8),
    SlaveExports(u8),
    Register(u8, u16),
    NoMatch,
}

impl Node {
    /// Classify a path.
    pub fn classify(path: &str) -> Self {
        match split_path(path).as_slice() {
            [] => Node::Root,
            [name] if *name == EXPORTS => Node::GlobalExports,
            [slave] => parse_number(slave).map_or(Node::NoMatch, Node::SlaveDir),
            [slave, name] => {
                let Some(address) = parse_number(slave) else {
                    return Node::NoMatch;
                };
                if *name == EXPORTS {
                    Node::SlaveExports(address)
                } else {
                    parse_number(name).map_or(Node::NoMatch, |index| Node::Register(address, index))
                }
            }
            _ => Node::NoMatch,
        }
    }

    /// Slave address this node belongs to, if any.
    pub fn slave(&self) -> Option<u8> {
        match self {
            Node::SlaveDir(a) | Node::SlaveExports(a) | Node::Register(a, _) => Some(*a),
            _ => None,
        }
    }

    /// Returns true for the two directory shapes.
    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Root | Node::SlaveDir(_))
    }

    /// Canonical absolute path for this node.
    ///
    /// `NoMatch` has no canonical path and renders as the empty string.
    pub fn path(&self) -> String {
        match self {
            Node::Root => "/".to_string(),
            Node::GlobalExports => format!("/{EXPORTS}"),
            Node::SlaveDir(a) => format!("/{a}"),
            Node::SlaveExports(a) => format!("/{a}/{EXPORTS}"),
            Node::Register(a, i) => format!("/{a}/{i}"),
            Node::NoMatch => String::new(),
        }
    }

    /// Child of a directory node by entry name.
    pub fn child(&self, name: &str) -> Self {
        match self {
            Node::Root | Node::SlaveDir(_) => {
                let base = self.path();
                Node::classify(&format!("{}/{}", base.trim_end_matches('/'), name))
            }
            _ => Node::NoMatch,
        }
    }

    /// Parent directory node.
    pub fn parent(&self) -> Self {
        match self {
            Node::Root | Node::GlobalExports | Node::SlaveDir(_) => Node::Root,
            Node::SlaveExports(a) | Node::Register(a, _) => Node::SlaveDir(*a),
            Node::NoMatch => Node::NoMatch,
        }
    }
}

/// Strict unsigned decimal parse; signs, whitespace and trailing junk fail.
fn parse_number<T: std::str::FromStr>(component: &str) -> Option<T> {
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    component.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert!(split_path("/").is_empty());
        assert!(split_path("").is_empty());
        assert_eq!(split_path("/17/5"), vec!["17", "5"]);
        assert_eq!(split_path("//17///exports/"), vec!["17", "exports"]);
        assert_eq!(split_path("/17/../5"), vec!["17", "..", "5"]);
    }

    #[test]
    fn test_classify_depths() {
        assert_eq!(Node::classify("/"), Node::Root);
        assert_eq!(Node::classify("/exports"), Node::GlobalExports);
        assert_eq!(Node::classify("/17"), Node::SlaveDir(17));
        assert_eq!(Node::classify("/17/exports"), Node::SlaveExports(17));
        assert_eq!(Node::classify("/17/5"), Node::Register(17, 5));
        assert_eq!(Node::classify("/17/5/x"), Node::NoMatch);
    }

    #[test]
    fn test_classify_rejects_junk() {
        assert_eq!(Node::classify("/foo"), Node::NoMatch);
        assert_eq!(Node::classify("/17abc"), Node::NoMatch);
        assert_eq!(Node::classify("/-1"), Node::NoMatch);
        assert_eq!(Node::classify("/+17"), Node::NoMatch);
        assert_eq!(Node::classify("/300"), Node::NoMatch);
        assert_eq!(Node::classify("/17/65536"), Node::NoMatch);
        assert_eq!(Node::classify("/exports/5"), Node::NoMatch);
        assert_eq!(Node::classify("/17/foo"), Node::NoMatch);
        assert_eq!(Node::classify("/."), Node::NoMatch);
    }

    #[test]
    fn test_path_round_trip_for_named_nodes() {
        for node in [
            Node::Root,
            Node::GlobalExports,
            Node::SlaveDir(1),
            Node::SlaveExports(254),
            Node::Register(17, 65535),
        ] {
            assert_eq!(Node::classify(&node.path()), node);
        }
    }

    #[test]
    fn test_child_and_parent() {
        assert_eq!(Node::Root.child("exports"), Node::GlobalExports);
        assert_eq!(Node::Root.child("17"), Node::SlaveDir(17));
        assert_eq!(Node::SlaveDir(17).child("5"), Node::Register(17, 5));
        assert_eq!(Node::SlaveDir(17).child("exports"), Node::SlaveExports(17));
        assert_eq!(Node::Register(17, 5).child("x"), Node::NoMatch);
        assert_eq!(Node::Register(17, 5).parent(), Node::SlaveDir(17));
        assert_eq!(Node::SlaveDir(17).parent(), Node::Root);
        assert_eq!(Node::Register(17, 5).slave(), Some(17));
        assert!(Node::SlaveDir(3).is_dir());
        assert!(!Node::GlobalExports.is_dir());
    }
}

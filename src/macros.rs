// (c) Copyright 2025 Helsing GmbH. All rights reserved.
/// Convenience macro for creating tickets.
///
/// NOTE! This is mostly useful for tests, since real tickets come from a
/// [`LogicalClock`](crate::LogicalClock).
///
/// ```rust
/// # use arbor::{ActorId, Ticket, ticket};
/// assert_eq!(ticket!(3, 1), Ticket::new(3, 0, ActorId::new(1)));
/// assert_eq!(ticket!(3, 2, 1), Ticket::new(3, 2, ActorId::new(1)));
/// ```
#[macro_export]
macro_rules! ticket {
    ($lamport:expr, $actor:expr) => {
        const {
            $crate::causal_context::Ticket::new(
                $lamport,
                0,
                $crate::causal_context::ActorId::new($actor),
            )
        }
    };
    ($lamport:expr, $delimiter:expr, $actor:expr) => {
        const {
            $crate::causal_context::Ticket::new(
                $lamport,
                $delimiter,
                $crate::causal_context::ActorId::new($actor),
            )
        }
    };
}

/// Convenience macro for creating a [`TreeNode`](crate::TreeNode).
///
/// A string literal is a text node. An element is its tag, optional attributes in braces, and its
/// children in brackets:
///
/// ```rust
/// # use arbor::tree_node;
/// let doc = tree_node!(doc [
///     p { align: "center" } ["Hello"],
///     ul [li ["a"], li ["b"]],
///     hr []
/// ]);
/// assert_eq!(
///     doc.to_xml(),
///     r#"<doc><p align="center">Hello</p><ul><li>a</li><li>b</li></ul><hr></hr></doc>"#
/// );
/// ```
///
/// Attribute values can be any expression that implements `Display`.
#[macro_export]
macro_rules! tree_node {
    // Helpers for collecting children
    (@children $out:ident;) => {};
    (@children $out:ident; $text:literal $(, $($rest:tt)*)?) => {
        $out.push($crate::TreeNode::text($text));
        $crate::tree_node!(@children $out; $($($rest)*)?);
    };
    (@children $out:ident; $tag:ident $({ $($attrs:tt)* })? [ $($inner:tt)* ] $(, $($rest:tt)*)?) => {
        $out.push($crate::tree_node!($tag $({ $($attrs)* })? [ $($inner)* ]));
        $crate::tree_node!(@children $out; $($($rest)*)?);
    };

    // Text
    ($text:literal) => {
        $crate::TreeNode::text($text)
    };

    // Element
    ($tag:ident $({ $($key:ident : $value:expr),* $(,)? })? [ $($children:tt)* ]) => {
        {
            #[allow(unused_mut)]
            let mut attributes = ::std::collections::BTreeMap::<
                ::std::string::String,
                ::std::string::String,
            >::new();
            $($(
                attributes.insert(
                    ::std::string::String::from(stringify!($key)),
                    ::std::string::ToString::to_string(&$value),
                );
            )*)?
            #[allow(unused_mut)]
            let mut children = ::std::vec::Vec::<$crate::TreeNode>::new();
            $crate::tree_node!(@children children; $($children)*);
            $crate::TreeNode::Element {
                tag: ::std::string::String::from(stringify!($tag)),
                attributes,
                children,
            }
        }
    };
}

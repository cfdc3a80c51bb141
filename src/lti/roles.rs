// ABOUTME: LTI role parsing for 1.1 short names, LIS URNs and LTI 1.3 vocabulary URIs
// ABOUTME: Table-driven mapping to a scope (course, institution, system) and a kind
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use serde::Serialize;

/// Where a role applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleScope {
    /// Context (course) membership role
    Course,
    /// Institution-wide person role
    Institution,
    /// System-wide role
    System,
}

/// What a role grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    /// Teaches the course
    Instructor,
    /// Student
    Learner,
    /// Administrator
    Admin,
    /// Teaching assistant
    TeachingAssistant,
    /// Anything not recognized
    Unknown,
}

/// One parsed role
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Role {
    /// Role as sent by the LMS
    pub value: String,
    /// Role vocabulary
    pub scope: RoleScope,
    /// Role within the vocabulary
    pub kind: RoleKind,
}

impl Role {
    /// Whether this role grants instructor privileges
    #[must_use]
    pub const fn is_instructor(&self) -> bool {
        matches!(
            self.kind,
            RoleKind::Instructor | RoleKind::Admin | RoleKind::TeachingAssistant
        )
    }
}

const SCOPE_PREFIXES: &[(&str, RoleScope)] = &[
    ("http://purl.imsglobal.org/vocab/lis/v2/membership", RoleScope::Course),
    (
        "http://purl.imsglobal.org/vocab/lis/v2/institution/person",
        RoleScope::Institution,
    ),
    ("http://purl.imsglobal.org/vocab/lis/v2/system/person", RoleScope::System),
    ("urn:lti:role:ims/lis/", RoleScope::Course),
    ("urn:lti:instrole:ims/lis/", RoleScope::Institution),
    ("urn:lti:sysrole:ims/lis/", RoleScope::System),
];

const ROLE_KINDS: &[(&str, RoleKind)] = &[
    ("Instructor", RoleKind::Instructor),
    ("Faculty", RoleKind::Instructor),
    ("Learner", RoleKind::Learner),
    ("Student", RoleKind::Learner),
    ("Administrator", RoleKind::Admin),
    ("SysAdmin", RoleKind::Admin),
    ("AccountAdmin", RoleKind::Admin),
    ("TeachingAssistant", RoleKind::TeachingAssistant),
];

fn kind_of(name: &str) -> Option<RoleKind> {
    ROLE_KINDS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|&(_, kind)| kind)
}

/// Parse one role
///
/// A sub-role (`Instructor/TeachingAssistant`, `membership/Instructor#TeachingAssistant`)
/// takes precedence over its parent when the sub-role is known.
#[must_use]
pub fn parse_role(value: &str) -> Role {
    let trimmed = value.trim();
    let (scope, rest) = SCOPE_PREFIXES
        .iter()
        .find_map(|&(prefix, scope)| trimmed.strip_prefix(prefix).map(|rest| (scope, rest)))
        .unwrap_or((RoleScope::Course, trimmed));

    let mut segments = rest
        .split(['#', '/'])
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    let kind = match segments.pop() {
        Some(last) => kind_of(last)
            .or_else(|| segments.first().and_then(|main| kind_of(main)))
            .unwrap_or(RoleKind::Unknown),
        None => RoleKind::Unknown,
    };

    Role {
        value: trimmed.to_owned(),
        scope,
        kind,
    }
}

/// Parse a comma-separated role list
#[must_use]
pub fn parse_roles(roles: &str) -> Vec<Role> {
    roles
        .split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(parse_role)
        .collect()
}

/// Whether any role grants instructor privileges
#[must_use]
pub fn is_instructor(roles: &[Role]) -> bool {
    roles.iter().any(Role::is_instructor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_role_grammar() {
        let cases = [
            ("Instructor", RoleScope::Course, RoleKind::Instructor),
            ("Learner", RoleScope::Course, RoleKind::Learner),
            (
                "urn:lti:role:ims/lis/TeachingAssistant",
                RoleScope::Course,
                RoleKind::TeachingAssistant,
            ),
            (
                "urn:lti:role:ims/lis/Instructor/TeachingAssistant",
                RoleScope::Course,
                RoleKind::TeachingAssistant,
            ),
            (
                "urn:lti:instrole:ims/lis/Administrator",
                RoleScope::Institution,
                RoleKind::Admin,
            ),
            ("urn:lti:sysrole:ims/lis/SysAdmin", RoleScope::System, RoleKind::Admin),
            (
                "http://purl.imsglobal.org/vocab/lis/v2/membership#Learner",
                RoleScope::Course,
                RoleKind::Learner,
            ),
            (
                "http://purl.imsglobal.org/vocab/lis/v2/membership/Instructor#TeachingAssistant",
                RoleScope::Course,
                RoleKind::TeachingAssistant,
            ),
            (
                "http://purl.imsglobal.org/vocab/lis/v2/institution/person#Faculty",
                RoleScope::Institution,
                RoleKind::Instructor,
            ),
            (
                "http://purl.imsglobal.org/vocab/lis/v2/system/person#Administrator",
                RoleScope::System,
                RoleKind::Admin,
            ),
            ("urn:lti:role:ims/lis/Mentor", RoleScope::Course, RoleKind::Unknown),
        ];
        for (value, scope, kind) in cases {
            let role = parse_role(value);
            assert_eq!((role.scope, role.kind), (scope, kind), "{value}");
        }
    }

    #[test]
    fn unknown_sub_role_falls_back_to_parent() {
        let role = parse_role("urn:lti:role:ims/lis/Instructor/GuestInstructor");
        assert_eq!(role.kind, RoleKind::Instructor);
    }

    #[test]
    fn instructor_flag_requires_a_privileged_role() {
        assert!(is_instructor(&parse_roles("Learner, urn:lti:role:ims/lis/Instructor")));
        assert!(is_instructor(&parse_roles(
            "urn:lti:instrole:ims/lis/Administrator"
        )));
        assert!(!is_instructor(&parse_roles("Learner,urn:lti:role:ims/lis/Mentor")));
        assert!(!is_instructor(&parse_roles("")));
    }
}

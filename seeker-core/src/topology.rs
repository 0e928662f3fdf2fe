use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use thiserror::Error;

/// First line every expected-components file must carry.
pub const CONFIG_FILE_VERSION: &str = "seeker expected components v1.0";

const SITE_TYPE: &str = "Site";
const IFC_TYPE: &str = "IfChain";
const BEAM_TYPE: &str = "Beam";
const DETECTOR_TYPE: &str = "Detector";
const BEAM_TO_ATA_BEAMS_KEYWORD: &str = "BeamToAtaBeams";
const CHANNELIZER_KEYWORD: &str = "Channelizer";

/// Failures while parsing or querying the expected-components description.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TopologyError {
    #[error("line 1: expected version '{expected}', got '{got}'")]
    BadVersion { expected: String, got: String },

    #[error("line {line}: {problem}")]
    BadLine { line: usize, problem: String },

    #[error("component '{0}' appears more than once")]
    DuplicateComponent(String),

    #[error("child '{child}' of '{parent}' is already claimed")]
    DuplicateChild { parent: String, child: String },

    #[error("component '{child}' has no parent of type {parent_type}")]
    MissingParent {
        child: String,
        parent_type: &'static str,
    },

    #[error("no beam is associated with channelizer '{channel}'")]
    UnknownBeam { channel: String },

    #[error("io error reading topology: {0}")]
    Io(String),
}

/// Component category within the expected hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Site,
    IfChain,
    Beam,
    Detector,
}

impl NodeKind {
    fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Site => SITE_TYPE,
            NodeKind::IfChain => IFC_TYPE,
            NodeKind::Beam => BEAM_TYPE,
            NodeKind::Detector => DETECTOR_TYPE,
        }
    }

    fn child_list_type(&self) -> Option<&'static str> {
        match self {
            NodeKind::Site => Some("IfChainList"),
            NodeKind::IfChain => Some("BeamList"),
            NodeKind::Beam => Some("DetectorList"),
            NodeKind::Detector => None,
        }
    }

    fn parent(&self) -> Option<NodeKind> {
        match self {
            NodeKind::Site => None,
            NodeKind::IfChain => Some(NodeKind::Site),
            NodeKind::Beam => Some(NodeKind::IfChain),
            NodeKind::Detector => Some(NodeKind::Beam),
        }
    }

    fn from_type_name(name: &str) -> Option<NodeKind> {
        match name {
            SITE_TYPE => Some(NodeKind::Site),
            IFC_TYPE => Some(NodeKind::IfChain),
            BEAM_TYPE => Some(NodeKind::Beam),
            DETECTOR_TYPE => Some(NodeKind::Detector),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    name: String,
    parent: Option<String>,
    children: Vec<String>,
    site: Option<String>,
}

/// Parsed static description of the Site -> IfChain -> Beam -> Detector
/// hierarchy plus the beam/ata-beam and channelizer/beam associations.
#[derive(Debug, Clone, Default)]
pub struct ExpectedTopology {
    nodes: BTreeMap<String, Node>,
    beam_to_ata_beams: BTreeMap<String, Vec<String>>,
    beam_to_channels: BTreeMap<String, Vec<String>>,
}

impl ExpectedTopology {
    pub fn parse_file(path: &Path) -> Result<Self, TopologyError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| TopologyError::Io(err.to_string()))?;
        Self::parse(&raw)
    }

    pub fn parse(text: &str) -> Result<Self, TopologyError> {
        let mut lines = text.lines().enumerate();

        let version = loop {
            match lines.next() {
                Some((_, line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() || trimmed.starts_with('#') {
                        continue;
                    }
                    break trimmed.to_string();
                }
                None => {
                    return Err(TopologyError::BadVersion {
                        expected: CONFIG_FILE_VERSION.to_string(),
                        got: String::new(),
                    })
                }
            }
        };
        if version != CONFIG_FILE_VERSION {
            return Err(TopologyError::BadVersion {
                expected: CONFIG_FILE_VERSION.to_string(),
                got: version,
            });
        }

        let mut topology = ExpectedTopology::default();
        for (index, line) in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            let linenum = index + 1;
            match tokens[0] {
                BEAM_TO_ATA_BEAMS_KEYWORD => {
                    topology.add_association(
                        &tokens,
                        linenum,
                        AssociationKind::AtaBeams,
                    )?;
                }
                CHANNELIZER_KEYWORD => {
                    topology.add_association(
                        &tokens,
                        linenum,
                        AssociationKind::Channels,
                    )?;
                }
                _ => topology.add_component(&tokens, linenum)?,
            }
        }

        topology.verify_parents()?;
        topology.assign_sites();
        Ok(topology)
    }

    fn add_component(
        &mut self,
        tokens: &[&str],
        linenum: usize,
    ) -> Result<(), TopologyError> {
        let kind = NodeKind::from_type_name(tokens[0]).ok_or_else(|| {
            TopologyError::BadLine {
                line: linenum,
                problem: format!("unknown component type '{}'", tokens[0]),
            }
        })?;
        if tokens.len() < 2 {
            return Err(TopologyError::BadLine {
                line: linenum,
                problem: "missing component name".to_string(),
            });
        }
        let name = tokens[1].to_string();
        if self.nodes.contains_key(&name) {
            return Err(TopologyError::DuplicateComponent(name));
        }

        let mut children = Vec::new();
        match kind.child_list_type() {
            Some(expected_list) => {
                if tokens.len() < 3 || tokens[2] != expected_list {
                    return Err(TopologyError::BadLine {
                        line: linenum,
                        problem: format!(
                            "{} '{}' must declare a {}",
                            kind, name, expected_list
                        ),
                    });
                }
                for &child in &tokens[3..] {
                    if children.iter().any(|existing| existing == child) {
                        return Err(TopologyError::DuplicateChild {
                            parent: name.clone(),
                            child: child.to_string(),
                        });
                    }
                    // A child may only be claimed by one parent anywhere.
                    if let Some(other_parent) = self.parent_claiming(child) {
                        return Err(TopologyError::DuplicateChild {
                            parent: other_parent,
                            child: child.to_string(),
                        });
                    }
                    children.push(child.to_string());
                }
            }
            None => {
                if tokens.len() > 2 {
                    return Err(TopologyError::BadLine {
                        line: linenum,
                        problem: format!("{kind} '{name}' takes no child list"),
                    });
                }
            }
        }

        // Leaf children materialize as their own nodes when first claimed.
        for child in &children {
            if kind == NodeKind::Beam {
                self.nodes.insert(
                    child.clone(),
                    Node {
                        kind: NodeKind::Detector,
                        name: child.clone(),
                        parent: Some(name.clone()),
                        children: Vec::new(),
                        site: None,
                    },
                );
            }
        }

        self.nodes.insert(
            name.clone(),
            Node {
                kind,
                name,
                parent: None,
                children,
                site: None,
            },
        );
        Ok(())
    }

    fn parent_claiming(&self, child: &str) -> Option<String> {
        self.nodes
            .values()
            .find(|node| node.children.iter().any(|c| c == child))
            .map(|node| node.name.clone())
    }

    fn add_association(
        &mut self,
        tokens: &[&str],
        linenum: usize,
        which: AssociationKind,
    ) -> Result<(), TopologyError> {
        if tokens.len() < 3 {
            return Err(TopologyError::BadLine {
                line: linenum,
                problem: format!("{} needs a beam and at least one name", tokens[0]),
            });
        }
        let beam = tokens[1].to_string();
        let names: Vec<String> = tokens[2..].iter().map(|s| s.to_string()).collect();
        let map = match which {
            AssociationKind::AtaBeams => &mut self.beam_to_ata_beams,
            AssociationKind::Channels => &mut self.beam_to_channels,
        };
        for name in &names {
            let already = map.values().flatten().any(|existing| existing == name);
            if already {
                return Err(TopologyError::BadLine {
                    line: linenum,
                    problem: format!("'{name}' is associated with more than one beam"),
                });
            }
        }
        map.entry(beam).or_default().extend(names);
        Ok(())
    }

    fn verify_parents(&mut self) -> Result<(), TopologyError> {
        // Wire up parent links from the child lists.
        let links: Vec<(String, String)> = self
            .nodes
            .values()
            .flat_map(|node| {
                node.children
                    .iter()
                    .map(|child| (child.clone(), node.name.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (child, parent) in links {
            if let Some(node) = self.nodes.get_mut(&child) {
                node.parent = Some(parent);
            }
        }

        for node in self.nodes.values() {
            if let Some(required_parent) = node.kind.parent() {
                if node.parent.is_none() {
                    return Err(TopologyError::MissingParent {
                        child: node.name.clone(),
                        parent_type: required_parent.type_name(),
                    });
                }
            }
            // Every listed child must exist as a component.
            for child in &node.children {
                if !self.nodes.contains_key(child) {
                    return Err(TopologyError::MissingParent {
                        child: child.clone(),
                        parent_type: node.kind.type_name(),
                    });
                }
            }
        }
        Ok(())
    }

    fn assign_sites(&mut self) {
        let sites: Vec<String> = self
            .nodes
            .values()
            .filter(|node| node.kind == NodeKind::Site)
            .map(|node| node.name.clone())
            .collect();
        for site in sites {
            let mut queue = vec![site.clone()];
            while let Some(name) = queue.pop() {
                if let Some(node) = self.nodes.get_mut(&name) {
                    node.site = Some(site.clone());
                    queue.extend(node.children.iter().cloned());
                }
            }
        }
    }

    pub fn component_names(&self, kind: NodeKind) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|node| node.kind == kind)
            .map(|node| node.name.as_str())
            .collect()
    }

    pub fn component_names_for_site(&self, kind: NodeKind, site: &str) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|node| node.kind == kind && node.site.as_deref() == Some(site))
            .map(|node| node.name.as_str())
            .collect()
    }

    pub fn children_of(&self, name: &str) -> Vec<&str> {
        self.nodes
            .get(name)
            .map(|node| node.children.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn parent_of(&self, name: &str) -> Option<&str> {
        self.nodes.get(name)?.parent.as_deref()
    }

    pub fn ata_beams_for_beam(&self, beam: &str) -> Vec<&str> {
        self.beam_to_ata_beams
            .get(beam)
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn channels_for_beam(&self, beam: &str) -> Vec<&str> {
        self.beam_to_channels
            .get(beam)
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Beam associated with a channelizer. A channelizer nothing claims is a
    /// configuration error surfaced as `UnknownBeam`.
    pub fn beam_for_channel(&self, channel: &str) -> Result<&str, TopologyError> {
        self.beam_to_channels
            .iter()
            .find(|(_, channels)| channels.iter().any(|c| c == channel))
            .map(|(beam, _)| beam.as_str())
            .ok_or_else(|| TopologyError::UnknownBeam {
                channel: channel.to_string(),
            })
    }

    /// Beam whose detector list contains the named detector.
    pub fn beam_for_detector(&self, detector: &str) -> Option<&str> {
        self.parent_of(detector)
    }
}

#[derive(Debug, Clone, Copy)]
enum AssociationKind {
    AtaBeams,
    Channels,
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "\
seeker expected components v1.0
# one site, one if chain, two beams
Site main IfChainList ifc1
IfChain ifc1 BeamList beam1 beam2
Beam beam1 DetectorList dx1 dx2
Beam beam2 DetectorList dx3
BeamToAtaBeams beam1 beamxa1 beamya1
BeamToAtaBeams beam2 beamxb1
Channelizer beam1 chan1 chan2
Channelizer beam2 chan3
";

    #[test]
    fn parses_the_full_hierarchy() {
        let topology = ExpectedTopology::parse(GOOD).unwrap();
        assert_eq!(topology.component_names(NodeKind::Site), vec!["main"]);
        assert_eq!(topology.component_names(NodeKind::Beam), vec!["beam1", "beam2"]);
        assert_eq!(
            topology.component_names(NodeKind::Detector),
            vec!["dx1", "dx2", "dx3"]
        );
        assert_eq!(topology.children_of("beam1"), vec!["dx1", "dx2"]);
        assert_eq!(topology.parent_of("dx3"), Some("beam2"));
        assert_eq!(topology.beam_for_detector("dx1"), Some("beam1"));
        assert_eq!(
            topology.ata_beams_for_beam("beam1"),
            vec!["beamxa1", "beamya1"]
        );
        assert_eq!(
            topology.component_names_for_site(NodeKind::Detector, "main"),
            vec!["dx1", "dx2", "dx3"]
        );
    }

    #[test]
    fn beam_for_channel_is_a_typed_failure_when_unclaimed() {
        let topology = ExpectedTopology::parse(GOOD).unwrap();
        assert_eq!(topology.beam_for_channel("chan2").unwrap(), "beam1");
        assert_eq!(topology.beam_for_channel("chan3").unwrap(), "beam2");
        assert!(matches!(
            topology.beam_for_channel("chan99"),
            Err(TopologyError::UnknownBeam { .. })
        ));
    }

    #[test]
    fn wrong_version_token_is_rejected() {
        let err = ExpectedTopology::parse("something else\n").unwrap_err();
        assert!(matches!(err, TopologyError::BadVersion { .. }));
    }

    #[test]
    fn duplicate_children_are_rejected() {
        let text = "\
seeker expected components v1.0
Site main IfChainList ifc1
IfChain ifc1 BeamList beam1 beam2
Beam beam1 DetectorList dx1
Beam beam2 DetectorList dx1
";
        let err = ExpectedTopology::parse(text).unwrap_err();
        assert!(matches!(err, TopologyError::DuplicateChild { .. }));
    }

    #[test]
    fn orphan_components_are_rejected() {
        let text = "\
seeker expected components v1.0
Site main IfChainList ifc1
IfChain ifc1 BeamList beam1
Beam beam1 DetectorList dx1
Beam beam9 DetectorList dx9
";
        let err = ExpectedTopology::parse(text).unwrap_err();
        assert!(matches!(err, TopologyError::MissingParent { .. }));
    }

    #[test]
    fn unknown_component_types_are_rejected() {
        let text = "\
seeker expected components v1.0
Rocket r1 StageList s1
";
        let err = ExpectedTopology::parse(text).unwrap_err();
        assert!(matches!(err, TopologyError::BadLine { .. }));
    }

    #[test]
    fn channel_claimed_by_two_beams_is_rejected() {
        let text = "\
seeker expected components v1.0
Site main IfChainList ifc1
IfChain ifc1 BeamList beam1 beam2
Beam beam1 DetectorList dx1
Beam beam2 DetectorList dx2
Channelizer beam1 chan1
Channelizer beam2 chan1
";
        let err = ExpectedTopology::parse(text).unwrap_err();
        assert!(matches!(err, TopologyError::BadLine { .. }));
    }
}

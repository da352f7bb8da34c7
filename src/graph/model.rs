//! Script graph data model
//!
//! The script document is parsed once when the engine starts and validated
//! up front, so the run loop only ever sees well-formed scenes, anchors and
//! regions.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer, Serialize};

use super::geometry::{Rect, Resolution};

/// Priority used when a region's schedule does not set one
pub const DEFAULT_PRIORITY: i32 = 5;

/// Script loading errors
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Failed to parse script: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Script has no root node (no scenes defined)")]
    NoRootNode,
    #[error("Duplicate scene id: {0}")]
    DuplicateScene(String),
    #[error("Duplicate region id '{region}' (scene '{scene}')")]
    DuplicateRegion { scene: String, region: String },
    #[error("Region '{region}' in scene '{scene}' targets unknown scene '{target}'")]
    UnknownTarget {
        scene: String,
        region: String,
        target: String,
    },
    #[error("Scene '{scene}' names unknown parent '{parent}'")]
    UnknownParent { scene: String, parent: String },
    #[error("Anchor '{anchor}' in scene '{scene}' is missing {field}")]
    MissingAnchorField {
        scene: String,
        anchor: String,
        field: &'static str,
    },
    #[error("Scene '{scene}': {detail}")]
    InvalidScene { scene: String, detail: String },
}

/// RGB color parsed from `#RRGGBB` (or Android-style `#AARRGGBB`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl HexColor {
    /// Color as an `[r, g, b]` triple
    pub fn rgb(&self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl TryFrom<String> for HexColor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let hex = value.trim().trim_start_matches('#');
        let hex = match hex.len() {
            _ if !hex.is_ascii() => return Err(format!("invalid hex color '{}'", value)),
            6 => hex,
            8 => &hex[2..],
            _ => return Err(format!("invalid hex color '{}'", value)),
        };
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| format!("invalid hex color '{}'", value))
        };
        Ok(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }
}

impl From<HexColor> for String {
    fn from(color: HexColor) -> Self {
        format!("#{:02X}{:02X}{:02X}", color.r, color.g, color.b)
    }
}

/// Local time of day for TIME schedules (`HH:MM` or `HH:MM:SS`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(pub NaiveTime);

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
            .map(TimeOfDay)
            .map_err(|_| format!("invalid time of day '{}'", value))
    }
}

impl From<TimeOfDay> for String {
    fn from(time: TimeOfDay) -> Self {
        time.0.format("%H:%M:%S").to_string()
    }
}

/// Perception technique used by an anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Image,
    Color,
    Text,
    Ai,
}

/// How a color anchor samples its rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSampling {
    #[default]
    Mean,
    Center,
}

/// A perception check that fingerprints a scene
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    #[serde(default)]
    pub id: String,
    pub match_type: MatchType,
    #[serde(flatten)]
    pub rect: Rect,
    /// Base64 / data-URL reference image (image match)
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub target_color: Option<HexColor>,
    #[serde(default)]
    pub target_text: Option<String>,
    #[serde(default)]
    pub target_prompt: Option<String>,
    /// Variable receiving the numeric value extracted on a match
    #[serde(default)]
    pub variable_name: Option<String>,
    /// Per-anchor override of the image match threshold
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Per-anchor override of the color distance tolerance
    #[serde(default)]
    pub tolerance: Option<f32>,
    #[serde(default)]
    pub sampling: ColorSampling,
}

/// Kind of action a region performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Click,
    LongPress,
    Swipe,
    Wait,
    LaunchApp,
    BackKey,
    CheckExit,
}

impl ActionType {
    /// Whether the action is carried out as a pointer gesture
    pub fn is_gesture(&self) -> bool {
        matches!(
            self,
            ActionType::Click | ActionType::LongPress | ActionType::Swipe
        )
    }
}

/// Swipe direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwipeDirection {
    Up,
    Down,
    Left,
    Right,
}

impl SwipeDirection {
    /// Unit displacement vector in screen coordinates (y grows downward)
    pub fn vector(&self) -> (f32, f32) {
        match self {
            SwipeDirection::Up => (0.0, -1.0),
            SwipeDirection::Down => (0.0, 1.0),
            SwipeDirection::Left => (-1.0, 0.0),
            SwipeDirection::Right => (1.0, 0.0),
        }
    }
}

/// Optional action parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionParams {
    #[serde(default)]
    pub repeat: Option<u32>,
    #[serde(default)]
    pub repeat_delay: Option<u64>,
    /// Hold time (long press), travel time (swipe) or delay (wait), in ms
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub direction: Option<SwipeDirection>,
    /// Swipe distance override in pixels
    #[serde(default)]
    pub distance: Option<f32>,
    /// Package to launch (LAUNCH_APP)
    #[serde(default)]
    pub package: Option<String>,
}

/// Abstract action descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(default)]
    pub params: ActionParams,
}

/// Schedule gating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScheduleMode {
    #[default]
    None,
    Interval,
    Count,
    Time,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// Scheduling constraints and priority of a region
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(default)]
    pub mode: ScheduleMode,
    /// Minimum time between runs in ms (INTERVAL)
    #[serde(default)]
    pub interval: Option<u64>,
    /// Maximum number of runs (COUNT)
    #[serde(default)]
    pub max_times: Option<u32>,
    /// Earliest time of day (TIME)
    #[serde(default)]
    pub time: Option<TimeOfDay>,
    /// Lower number wins
    #[serde(default = "default_priority")]
    pub priority: i32,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::None,
            interval: None,
            max_times: None,
            time: None,
            priority: DEFAULT_PRIORITY,
        }
    }
}

/// Variable gate: the region runs only while the variable is positive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub variable: String,
}

/// Side effect kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SideEffectKind {
    Decrement,
    Increment,
    Set,
}

/// Variable mutation applied after a region runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideEffect {
    #[serde(rename = "type")]
    pub kind: SideEffectKind,
    pub variable: String,
    #[serde(default)]
    pub value: Option<i64>,
}

/// A single item or a list of items
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(item)) => vec![item],
        Some(OneOrMany::Many(items)) => items,
    })
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

fn default_true() -> bool {
    true
}

/// A candidate action attached to a scene
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub rect: Rect,
    pub action: ActionConfig,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub condition: Option<Condition>,
    /// Extra triggers, OR-combined
    #[serde(default, deserialize_with = "one_or_many")]
    pub perception: Vec<Anchor>,
    #[serde(default)]
    pub side_effect: Option<SideEffect>,
    /// Scene this action leads to; `None` is a self-loop
    #[serde(default, deserialize_with = "empty_as_none")]
    pub target: Option<String>,
    #[serde(default, alias = "wait_before")]
    pub wait_before: u64,
    #[serde(default, alias = "wait_after")]
    pub wait_after: u64,
}

impl Region {
    /// Name of the runtime variable that can switch this region off
    pub fn enable_variable(&self) -> String {
        format!("enable_{}", self.label)
    }
}

/// One recognizable screen of the target application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneNode {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub is_root: bool,
    /// Interrupt/overlay scene checked before normal flow
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub anchors: Vec<Anchor>,
    #[serde(default)]
    pub min_matches: Option<usize>,
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub parent_node: Option<String>,
}

impl SceneNode {
    /// Minimum number of anchors that must match (defaults to all of them)
    pub fn min_matches(&self) -> usize {
        self.min_matches.unwrap_or(self.anchors.len())
    }

    /// Scene without visual check
    pub fn is_blind(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Display name for logs
    pub fn name(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }

    /// Look up a region by id
    pub fn region(&self, id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    /// Distinct scenes reachable through this scene's regions, in declaration order
    pub fn targets(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.regions
            .iter()
            .filter_map(|r| r.target.as_deref())
            .filter(|t| *t != self.id && seen.insert(*t))
            .collect()
    }
}

/// Free-form script metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptMetadata {
    #[serde(default)]
    pub name: Option<String>,
    /// App the script was authored against
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NodeCollection {
    List(Vec<SceneNode>),
    Keyed(BTreeMap<String, SceneNode>),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScript {
    #[serde(default)]
    metadata: ScriptMetadata,
    #[serde(default)]
    variables: HashMap<String, i64>,
    #[serde(alias = "scenes")]
    nodes: NodeCollection,
}

/// The compiled automation definition
#[derive(Debug, Clone)]
pub struct ScriptGraph {
    nodes: Vec<SceneNode>,
    index: HashMap<String, usize>,
    root: usize,
    variables: HashMap<String, i64>,
    metadata: ScriptMetadata,
}

impl ScriptGraph {
    /// Parse and validate a script document
    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        let raw: RawScript = serde_json::from_str(json)?;
        let nodes = match raw.nodes {
            NodeCollection::List(nodes) => nodes,
            NodeCollection::Keyed(map) => map
                .into_iter()
                .map(|(key, mut node)| {
                    if node.id.is_empty() {
                        node.id = key;
                    }
                    node
                })
                .collect(),
        };
        Self::from_parts(nodes, raw.variables, raw.metadata)
    }

    /// Build a graph from already-parsed parts
    pub fn from_parts(
        nodes: Vec<SceneNode>,
        variables: HashMap<String, i64>,
        metadata: ScriptMetadata,
    ) -> Result<Self, ScriptError> {
        if nodes.is_empty() {
            return Err(ScriptError::NoRootNode);
        }

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if node.id.is_empty() {
                return Err(ScriptError::InvalidScene {
                    scene: format!("#{}", i),
                    detail: "scene id is empty".to_string(),
                });
            }
            if index.insert(node.id.clone(), i).is_some() {
                return Err(ScriptError::DuplicateScene(node.id.clone()));
            }
        }

        let mut region_ids = HashSet::new();
        for node in &nodes {
            validate_node(node, &index, &mut region_ids)?;
        }

        let roots: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_root)
            .map(|(i, _)| i)
            .collect();
        if roots.len() > 1 {
            log::warn!(
                "Script flags {} root scenes; using '{}'",
                roots.len(),
                nodes[roots[0]].id
            );
        }
        let root = roots.first().copied().unwrap_or(0);

        Ok(Self {
            nodes,
            index,
            root,
            variables,
            metadata,
        })
    }

    /// All scenes in declaration order
    pub fn nodes(&self) -> &[SceneNode] {
        &self.nodes
    }

    /// Look up a scene by id
    pub fn node(&self, id: &str) -> Option<&SceneNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Root scene (first scene if none is flagged)
    pub fn root(&self) -> &SceneNode {
        &self.nodes[self.root]
    }

    /// Interrupt/overlay scenes in declaration order
    pub fn global_nodes(&self) -> impl Iterator<Item = &SceneNode> {
        self.nodes.iter().filter(|n| n.is_global)
    }

    /// Initial variable values
    pub fn variables(&self) -> &HashMap<String, i64> {
        &self.variables
    }

    /// Script metadata
    pub fn metadata(&self) -> &ScriptMetadata {
        &self.metadata
    }

    /// Find the scene owning a region
    pub fn region(&self, region_id: &str) -> Option<(&SceneNode, &Region)> {
        self.nodes
            .iter()
            .find_map(|n| n.region(region_id).map(|r| (n, r)))
    }
}

fn invalid(node: &SceneNode, detail: String) -> ScriptError {
    ScriptError::InvalidScene {
        scene: node.id.clone(),
        detail,
    }
}

fn validate_node(
    node: &SceneNode,
    index: &HashMap<String, usize>,
    region_ids: &mut HashSet<String>,
) -> Result<(), ScriptError> {
    if let Some(res) = node.resolution {
        if res.width == 0 || res.height == 0 {
            return Err(invalid(node, "resolution has a zero dimension".to_string()));
        }
    }
    if let Some(parent) = &node.parent_node {
        if !index.contains_key(parent) {
            return Err(ScriptError::UnknownParent {
                scene: node.id.clone(),
                parent: parent.clone(),
            });
        }
    }
    if let Some(min) = node.min_matches {
        if min > node.anchors.len() {
            return Err(invalid(
                node,
                format!(
                    "minMatches {} exceeds anchor count {}",
                    min,
                    node.anchors.len()
                ),
            ));
        }
    }

    for anchor in &node.anchors {
        validate_anchor(node, anchor)?;
    }

    for region in &node.regions {
        if region.id.is_empty() {
            return Err(invalid(node, "region id is empty".to_string()));
        }
        if !region_ids.insert(region.id.clone()) {
            return Err(ScriptError::DuplicateRegion {
                scene: node.id.clone(),
                region: region.id.clone(),
            });
        }
        region
            .rect
            .validate()
            .map_err(|e| invalid(node, format!("region '{}': {}", region.id, e)))?;
        if let Some(target) = &region.target {
            if !index.contains_key(target) {
                return Err(ScriptError::UnknownTarget {
                    scene: node.id.clone(),
                    region: region.id.clone(),
                    target: target.clone(),
                });
            }
        }
        let schedule = &region.schedule;
        let missing = match schedule.mode {
            ScheduleMode::None => None,
            ScheduleMode::Interval => schedule.interval.is_none().then_some("interval"),
            ScheduleMode::Count => schedule.max_times.is_none().then_some("maxTimes"),
            ScheduleMode::Time => schedule.time.is_none().then_some("time"),
        };
        if let Some(field) = missing {
            return Err(invalid(
                node,
                format!("region '{}' schedule is missing {}", region.id, field),
            ));
        }
        for trigger in &region.perception {
            validate_anchor(node, trigger)?;
        }
    }
    Ok(())
}

fn validate_anchor(node: &SceneNode, anchor: &Anchor) -> Result<(), ScriptError> {
    anchor
        .rect
        .validate()
        .map_err(|e| invalid(node, format!("anchor '{}': {}", anchor.id, e)))?;

    let missing = match anchor.match_type {
        MatchType::Image => anchor.template.is_none().then_some("template"),
        MatchType::Color => anchor.target_color.is_none().then_some("targetColor"),
        MatchType::Text => anchor.target_text.is_none().then_some("targetText"),
        MatchType::Ai => anchor.target_prompt.is_none().then_some("targetPrompt"),
    };
    match missing {
        Some(field) => Err(ScriptError::MissingAnchorField {
            scene: node.id.clone(),
            anchor: anchor.id.clone(),
            field,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r##"{
        "metadata": { "name": "daily", "packageName": "com.example.game" },
        "variables": { "stamina": 3 },
        "nodes": [
            {
                "id": "home", "label": "Home", "isRoot": true,
                "resolution": { "width": 1080, "height": 2400 },
                "anchors": [
                    { "id": "bar", "matchType": "color", "x": 0, "y": 95, "w": 100, "h": 5,
                      "targetColor": "#1E88E5" }
                ],
                "regions": [
                    { "id": "start", "label": "Start", "x": 40, "y": 80, "w": 20, "h": 6,
                      "action": { "type": "CLICK" },
                      "schedule": { "mode": "INTERVAL", "interval": 5000, "priority": 3 },
                      "condition": { "variable": "stamina" },
                      "sideEffect": { "type": "DECREMENT", "variable": "stamina" },
                      "target": "battle", "wait_after": 300 },
                    { "id": "idle", "x": 0, "y": 0, "w": 10, "h": 10,
                      "action": { "type": "WAIT", "params": { "duration": 2000 } },
                      "target": "" }
                ]
            },
            {
                "id": "battle",
                "anchors": [
                    { "id": "hp", "matchType": "text", "x": 0, "y": 0, "w": 20, "h": 5,
                      "targetText": "HP", "variableName": "hp" }
                ],
                "regions": [
                    { "id": "swipe", "x": 30, "y": 30, "w": 40, "h": 40,
                      "action": { "type": "SWIPE", "params": { "direction": "UP" } },
                      "perception": { "id": "t", "matchType": "color", "x": 0, "y": 0,
                                      "w": 5, "h": 5, "targetColor": "FF0000" } }
                ]
            }
        ]
    }"##;

    #[test]
    fn test_parse_script() {
        let graph = ScriptGraph::from_json(SCRIPT).unwrap();
        assert_eq!(graph.nodes().len(), 2);
        assert_eq!(graph.root().id, "home");
        assert_eq!(graph.variables().get("stamina"), Some(&3));
        assert_eq!(
            graph.metadata().package_name.as_deref(),
            Some("com.example.game")
        );

        let home = graph.node("home").unwrap();
        assert_eq!(home.min_matches(), 1);
        assert_eq!(home.targets(), vec!["battle"]);

        let start = home.region("start").unwrap();
        assert!(start.enabled);
        assert_eq!(start.schedule.priority, 3);
        assert_eq!(start.schedule.mode, ScheduleMode::Interval);
        assert_eq!(start.wait_after, 300);
        assert_eq!(start.enable_variable(), "enable_Start");
        assert_eq!(
            home.anchors[0].target_color,
            Some(HexColor {
                r: 0x1E,
                g: 0x88,
                b: 0xE5
            })
        );
    }

    #[test]
    fn test_defaults() {
        let graph = ScriptGraph::from_json(SCRIPT).unwrap();
        let idle = graph.node("home").unwrap().region("idle").unwrap();
        assert_eq!(idle.schedule.priority, DEFAULT_PRIORITY);
        assert_eq!(idle.schedule.mode, ScheduleMode::None);
        assert!(idle.target.is_none());

        let swipe = graph.node("battle").unwrap().region("swipe").unwrap();
        assert_eq!(swipe.perception.len(), 1);
        assert_eq!(swipe.action.params.direction, Some(SwipeDirection::Up));
    }

    #[test]
    fn test_root_falls_back_to_first_node() {
        let json = r#"{ "nodes": [ { "id": "a" }, { "id": "b" } ] }"#;
        let graph = ScriptGraph::from_json(json).unwrap();
        assert_eq!(graph.root().id, "a");
        assert!(graph.root().is_blind());
    }

    #[test]
    fn test_keyed_nodes() {
        let json = r#"{ "nodes": { "b": { "isRoot": true }, "a": {} } }"#;
        let graph = ScriptGraph::from_json(json).unwrap();
        assert_eq!(graph.root().id, "b");
        assert!(graph.node("a").is_some());
    }

    #[test]
    fn test_empty_script_has_no_root() {
        let result = ScriptGraph::from_json(r#"{ "nodes": [] }"#);
        assert!(matches!(result, Err(ScriptError::NoRootNode)));
    }

    #[test]
    fn test_unknown_target_rejected() {
        let json = r#"{ "nodes": [ { "id": "a", "regions": [
            { "id": "r", "action": { "type": "CLICK" }, "target": "nowhere" } ] } ] }"#;
        let result = ScriptGraph::from_json(json);
        assert!(matches!(result, Err(ScriptError::UnknownTarget { .. })));
    }

    #[test]
    fn test_missing_template_rejected() {
        let json = r#"{ "nodes": [ { "id": "a", "anchors": [
            { "id": "img", "matchType": "image", "x": 1, "y": 1, "w": 1, "h": 1 } ] } ] }"#;
        let result = ScriptGraph::from_json(json);
        assert!(matches!(
            result,
            Err(ScriptError::MissingAnchorField {
                field: "template",
                ..
            })
        ));
    }

    #[test]
    fn test_schedule_requires_parameter() {
        let json = r#"{ "nodes": [ { "id": "a", "regions": [
            { "id": "r", "action": { "type": "CLICK" }, "schedule": { "mode": "COUNT" } } ] } ] }"#;
        assert!(ScriptGraph::from_json(json).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let scenes = r#"{ "nodes": [ { "id": "a" }, { "id": "a" } ] }"#;
        assert!(matches!(
            ScriptGraph::from_json(scenes),
            Err(ScriptError::DuplicateScene(_))
        ));

        let regions = r#"{ "nodes": [
            { "id": "a", "regions": [ { "id": "r", "action": { "type": "CLICK" } } ] },
            { "id": "b", "regions": [ { "id": "r", "action": { "type": "CLICK" } } ] } ] }"#;
        assert!(matches!(
            ScriptGraph::from_json(regions),
            Err(ScriptError::DuplicateRegion { .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ScriptGraph::from_json("{ not json"),
            Err(ScriptError::Parse(_))
        ));
    }

    #[test]
    fn test_hex_color_parsing() {
        let color = HexColor::try_from("#FF8000".to_string()).unwrap();
        assert_eq!(color.rgb(), [255, 128, 0]);
        let argb = HexColor::try_from("#80FF8000".to_string()).unwrap();
        assert_eq!(argb.rgb(), [255, 128, 0]);
        assert!(HexColor::try_from("#GG0000".to_string()).is_err());
        assert_eq!(String::from(color), "#FF8000");
    }

    #[test]
    fn test_time_of_day_parsing() {
        let t = TimeOfDay::try_from("07:30".to_string()).unwrap();
        assert_eq!(t.0, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert!(TimeOfDay::try_from("25:00".to_string()).is_err());
    }
}

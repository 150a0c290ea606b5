//! In-memory simulation platform.
//!
//! Models the platform's object tree closely enough to drive a full campaign
//! without an external process: study-case activation, folders, result
//! collectors, task automation and tabular export. Every command is recorded
//! so tests and dry runs can inspect what a campaign did.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{ObjectHandle, Platform, ProjectFolder, Value};
use crate::error::{CampaignError, CampaignResult};

#[derive(Debug, Clone)]
struct Node {
    class: String,
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    attributes: BTreeMap<String, Value>,
    active: bool,
    deleted: bool,
}

/// One recorded method call.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub object: ObjectHandle,
    pub class: String,
    pub method: String,
    pub args: Vec<Value>,
}

/// One recorded attribute write.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeWrite {
    pub object: ObjectHandle,
    pub attribute: String,
    pub value: Value,
}

/// Node of a JSON model snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelNode {
    pub class: String,
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub children: Vec<ModelNode>,
}

/// JSON model snapshot used for dry runs.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSnapshot {
    pub tree: Vec<ModelNode>,
    /// Absolute path of the active project
    pub active_project: Option<String>,
    /// Absolute path of the active study case
    pub active_study_case: Option<String>,
    /// Absolute paths of the well-known folders
    #[serde(default)]
    pub folders: HashMap<ProjectFolder, String>,
}

/// In-memory object tree implementing [`Platform`].
#[derive(Debug, Clone)]
pub struct MemoryPlatform {
    nodes: Vec<Node>,
    active_project: Option<usize>,
    active_study_case: Option<usize>,
    folders: HashMap<ProjectFolder, usize>,
    result_variables: HashMap<usize, Vec<(ObjectHandle, String)>>,
    task_list: HashMap<usize, Vec<Value>>,
    commands: Vec<CommandRecord>,
    writes: Vec<AttributeWrite>,
    versions: Vec<String>,
    batch_exit_code: i64,
    echo: bool,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

const ROOT: usize = 0;

impl MemoryPlatform {
    /// Empty tree containing only the hidden root.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                class: String::new(),
                name: String::new(),
                parent: None,
                children: Vec::new(),
                attributes: BTreeMap::new(),
                active: false,
                deleted: false,
            }],
            active_project: None,
            active_study_case: None,
            folders: HashMap::new(),
            result_variables: HashMap::new(),
            task_list: HashMap::new(),
            commands: Vec::new(),
            writes: Vec::new(),
            versions: Vec::new(),
            batch_exit_code: 0,
            echo: true,
        }
    }

    /// Test bench model with one calculation-relevant grid.
    ///
    /// ```text
    /// \user.IntUser\Plant.IntPrj
    ///   Network Model.IntPrjfolder            (netmod)
    ///     Network Data.IntPrjfolder           (netdat)
    ///       Plant.ElmNet                      calc relevant
    ///         Bus1.ElmTerm
    ///       MTB.ElmNet                        calc relevant
    ///         MTB.IntFolder                   test bench root
    ///           measurements.ElmDsl, mtb_s_*.ElmDsl,
    ///           initializer_script.ComDpl, initializer_qdsl.ElmQdsl
    ///       Spare.ElmNet                      not relevant
    ///   Study Cases.IntPrjfolder              (study)
    ///     Base.IntCase                        active
    /// ```
    pub fn test_bench() -> Self {
        let mut p = Self::new();
        let user = p.add(None, "IntUser", "user");
        let project = p.add(Some(user), "IntPrj", "Plant");
        let settings = p.add(Some(project), "SetFold", "Settings");
        p.add(Some(settings), "SetPrj", "Project Settings");

        let netmod = p.add(Some(project), "IntPrjfolder", "Network Model");
        let netdat = p.add(Some(netmod), "IntPrjfolder", "Network Data");
        let plant = p.add(Some(netdat), "ElmNet", "Plant");
        p.set(plant, "calc_relevant", Value::Int(1));
        p.add(Some(plant), "ElmTerm", "Bus1");
        p.add(Some(plant), "ElmDsl", "ctrl");

        let mtb = p.add(Some(netdat), "ElmNet", "MTB");
        p.set(mtb, "calc_relevant", Value::Int(1));
        let root = p.add(Some(mtb), "IntFolder", "MTB");
        p.add(Some(root), "ComPython", "execute");
        p.add(Some(root), "ElmDsl", "measurements");
        p.add(Some(root), "ComDpl", "initializer_script");
        p.add(Some(root), "ElmQdsl", "initializer_qdsl");
        for block in ["mtb_s_pref_pu", "mtb_s_qref_pu"] {
            p.add(Some(root), "ElmDsl", block);
        }
        for i in 1..=10 {
            p.add(Some(root), "ElmDsl", &format!("mtb_s_{}", i));
        }

        let spare = p.add(Some(netdat), "ElmNet", "Spare");
        p.set(spare, "calc_relevant", Value::Int(0));

        let study = p.add(Some(project), "IntPrjfolder", "Study Cases");
        let base = p.add(Some(study), "IntCase", "Base");
        p.set(base, "iStudyTime", Value::Int(1_700_000_000));

        p.set_folder(ProjectFolder::NetworkModel, netmod);
        p.set_folder(ProjectFolder::NetworkData, netdat);
        p.set_folder(ProjectFolder::StudyCases, study);
        p.set_active_project(project);
        p.set_active_study_case(base);
        p
    }

    /// Build a tree from a JSON snapshot.
    pub fn from_snapshot(snapshot: &ModelSnapshot) -> CampaignResult<Self> {
        let mut p = Self::new();
        for node in &snapshot.tree {
            p.insert_model(None, node)?;
        }
        let root = ObjectHandle(ROOT as u64);
        if let Some(path) = &snapshot.active_project {
            let h = p.lookup(root, path)?;
            p.set_active_project(h);
        }
        if let Some(path) = &snapshot.active_study_case {
            let h = p.lookup(root, path)?;
            p.set_active_study_case(h);
        }
        for (folder, path) in &snapshot.folders {
            let h = p.lookup(root, path)?;
            p.set_folder(*folder, h);
        }
        Ok(p)
    }

    /// Read a JSON snapshot file.
    pub fn load_snapshot(path: impl AsRef<Path>) -> CampaignResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let snapshot: ModelSnapshot = serde_json::from_str(&content)?;
        Self::from_snapshot(&snapshot)
    }

    fn insert_model(&mut self, parent: Option<ObjectHandle>, node: &ModelNode) -> CampaignResult<()> {
        let h = self.add(parent, &node.class, &node.name);
        for (key, value) in &node.attributes {
            let value = match value {
                serde_json::Value::Null => Value::None,
                serde_json::Value::Bool(b) => Value::Int(i64::from(*b)),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => Value::Int(i),
                    None => Value::Float(n.as_f64().unwrap_or_default()),
                },
                serde_json::Value::String(s) => Value::Text(s.clone()),
                other => {
                    return Err(CampaignError::Config(format!(
                        "unsupported attribute value for {}.{}: {}",
                        node.name, key, other
                    )))
                }
            };
            self.set(h, key, value);
        }
        for child in &node.children {
            self.insert_model(Some(h), child)?;
        }
        Ok(())
    }

    fn lookup(&self, scope: ObjectHandle, path: &str) -> CampaignResult<ObjectHandle> {
        self.resolve(scope.0 as usize, path)
            .map(|i| ObjectHandle(i as u64))
            .ok_or_else(|| CampaignError::ObjectNotFound(path.to_string()))
    }

    /// Add an object; `None` places it at the top of the tree.
    pub fn add(&mut self, parent: Option<ObjectHandle>, class: &str, name: &str) -> ObjectHandle {
        let parent = parent.map(|h| h.0 as usize).unwrap_or(ROOT);
        let idx = self.nodes.len();
        self.nodes.push(Node {
            class: class.to_string(),
            name: name.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            attributes: BTreeMap::new(),
            active: false,
            deleted: false,
        });
        self.nodes[parent].children.push(idx);
        ObjectHandle(idx as u64)
    }

    /// Set an attribute without recording it.
    pub fn set(&mut self, object: ObjectHandle, name: &str, value: Value) {
        if let Some(node) = self.nodes.get_mut(object.0 as usize) {
            node.attributes.insert(name.to_string(), value);
        }
    }

    pub fn set_folder(&mut self, folder: ProjectFolder, object: ObjectHandle) {
        self.folders.insert(folder, object.0 as usize);
    }

    pub fn set_active_project(&mut self, object: ObjectHandle) {
        self.active_project = Some(object.0 as usize);
        self.nodes[object.0 as usize].active = true;
    }

    pub fn set_active_study_case(&mut self, object: ObjectHandle) {
        self.active_study_case = Some(object.0 as usize);
        self.nodes[object.0 as usize].active = true;
    }

    /// Exit code reported by the next task batch.
    pub fn fail_batch_with(&mut self, code: i64) {
        self.batch_exit_code = code;
    }

    /// Every method call so far, in order.
    pub fn commands(&self) -> &[CommandRecord] {
        &self.commands
    }

    /// Calls of `method` on objects of `class`.
    pub fn commands_on(&self, class: &str, method: &str) -> Vec<&CommandRecord> {
        self.commands
            .iter()
            .filter(|c| c.class == class && c.method == method)
            .collect()
    }

    /// Every recorded attribute write, in order.
    pub fn attribute_writes(&self) -> &[AttributeWrite] {
        &self.writes
    }

    /// Project versions created so far.
    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    /// Live objects of a class, in creation order.
    pub fn objects_of_class(&self, class: &str) -> Vec<ObjectHandle> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.deleted && n.class == class)
            .map(|(i, _)| ObjectHandle(i as u64))
            .collect()
    }

    /// Name of an object.
    pub fn name_of(&self, object: ObjectHandle) -> Option<&str> {
        self.node(object).ok().map(|n| n.name.as_str())
    }

    /// Attribute value without recording the read.
    pub fn attribute(&self, object: ObjectHandle, name: &str) -> Option<&Value> {
        self.node(object).ok().and_then(|n| n.attributes.get(name))
    }

    pub fn is_active(&self, object: ObjectHandle) -> bool {
        self.node(object).map(|n| n.active).unwrap_or(false)
    }

    pub fn echo(&self) -> bool {
        self.echo
    }

    /// Variables recorded by a result collector.
    pub fn result_variables(&self, result_set: ObjectHandle) -> &[(ObjectHandle, String)] {
        self.result_variables
            .get(&(result_set.0 as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn node(&self, object: ObjectHandle) -> CampaignResult<&Node> {
        self.nodes
            .get(object.0 as usize)
            .filter(|n| !n.deleted && object.0 != ROOT as u64)
            .ok_or_else(|| CampaignError::ObjectNotFound(object.to_string()))
    }

    fn node_mut(&mut self, object: ObjectHandle) -> CampaignResult<&mut Node> {
        self.nodes
            .get_mut(object.0 as usize)
            .filter(|n| !n.deleted && object.0 != ROOT as u64)
            .ok_or_else(|| CampaignError::ObjectNotFound(object.to_string()))
    }

    fn segment_matches(node: &Node, segment: &str) -> bool {
        if node.deleted {
            return false;
        }
        let qualified = format!("{}.{}", node.name, node.class);
        qualified.eq_ignore_ascii_case(segment) || node.name.eq_ignore_ascii_case(segment)
    }

    fn resolve(&self, scope: usize, path: &str) -> Option<usize> {
        let (mut current, rest) = match path.strip_prefix('\\') {
            Some(rest) => (ROOT, rest),
            None => (scope, path),
        };
        for segment in rest.split('\\').filter(|s| !s.is_empty()) {
            current = *self.nodes[current]
                .children
                .iter()
                .find(|&&c| Self::segment_matches(&self.nodes[c], segment))?;
        }
        Some(current)
    }

    fn collect_contents(&self, parent: usize, class: &str, recursive: bool, out: &mut Vec<usize>) {
        for &child in &self.nodes[parent].children {
            let node = &self.nodes[child];
            if node.deleted {
                continue;
            }
            if node.class.eq_ignore_ascii_case(class) {
                out.push(child);
            }
            if recursive {
                self.collect_contents(child, class, recursive, out);
            }
        }
    }

    fn copy_subtree(&mut self, parent: usize, source: usize) -> usize {
        let src = self.nodes[source].clone();
        let idx = self.nodes.len();
        self.nodes.push(Node {
            class: src.class,
            name: src.name,
            parent: Some(parent),
            children: Vec::new(),
            attributes: src.attributes,
            active: false,
            deleted: false,
        });
        self.nodes[parent].children.push(idx);
        for child in src.children {
            if !self.nodes[child].deleted {
                self.copy_subtree(idx, child);
            }
        }
        idx
    }

    fn export_csv(&self, com_res: ObjectHandle) -> CampaignResult<()> {
        let node = self.node(com_res)?;
        let path = node
            .attributes
            .get("f_name")
            .and_then(Value::as_text)
            .map(PathBuf::from)
            .ok_or_else(|| CampaignError::Config("export has no file name".to_string()))?;
        let col_sep = node
            .attributes
            .get("col_Sep")
            .and_then(Value::as_text)
            .unwrap_or(";")
            .to_string();
        let dec_sep = node
            .attributes
            .get("dec_Sep")
            .and_then(Value::as_text)
            .unwrap_or(".")
            .to_string();
        let header = node
            .attributes
            .get("ciopt_head")
            .and_then(Value::as_int)
            .unwrap_or(0)
            == 1;
        let variables = node
            .attributes
            .get("pResult")
            .and_then(Value::as_object)
            .map(|r| self.result_variables(r).to_vec())
            .unwrap_or_default();

        let mut columns = vec!["b:tnow".to_string()];
        for (object, variable) in &variables {
            let name = self.name_of(*object).unwrap_or("?");
            columns.push(format!("{}\\{}", name, variable));
        }

        let mut out = String::new();
        if header {
            out.push_str(&columns.join(&col_sep));
            out.push('\n');
        }
        let zero = format!("0{}0", dec_sep);
        let row: Vec<&str> = columns.iter().map(|_| zero.as_str()).collect();
        out.push_str(&row.join(&col_sep));
        out.push('\n');

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, out)?;
        Ok(())
    }
}

impl Platform for MemoryPlatform {
    fn active_project(&mut self) -> CampaignResult<Option<ObjectHandle>> {
        Ok(self.active_project.map(|i| ObjectHandle(i as u64)))
    }

    fn active_study_case(&mut self) -> CampaignResult<Option<ObjectHandle>> {
        Ok(self.active_study_case.map(|i| ObjectHandle(i as u64)))
    }

    fn project_folder(&mut self, folder: ProjectFolder) -> CampaignResult<Option<ObjectHandle>> {
        Ok(self
            .folders
            .get(&folder)
            .filter(|&&i| !self.nodes[i].deleted)
            .map(|&i| ObjectHandle(i as u64)))
    }

    fn search(&mut self, scope: ObjectHandle, path: &str) -> CampaignResult<Option<ObjectHandle>> {
        if !path.starts_with('\\') {
            self.node(scope)?;
        }
        Ok(self
            .resolve(scope.0 as usize, path)
            .filter(|&i| i != ROOT)
            .map(|i| ObjectHandle(i as u64)))
    }

    fn contents(
        &mut self,
        parent: ObjectHandle,
        class: &str,
        recursive: bool,
    ) -> CampaignResult<Vec<ObjectHandle>> {
        self.node(parent)?;
        let mut out = Vec::new();
        self.collect_contents(parent.0 as usize, class, recursive, &mut out);
        Ok(out.into_iter().map(|i| ObjectHandle(i as u64)).collect())
    }

    fn parent(&mut self, object: ObjectHandle) -> CampaignResult<Option<ObjectHandle>> {
        Ok(self
            .node(object)?
            .parent
            .filter(|&p| p != ROOT)
            .map(|p| ObjectHandle(p as u64)))
    }

    fn full_name(&mut self, object: ObjectHandle) -> CampaignResult<String> {
        let mut parts = Vec::new();
        let mut current = Some(object.0 as usize);
        self.node(object)?;
        while let Some(i) = current.filter(|&i| i != ROOT) {
            let node = &self.nodes[i];
            parts.push(format!("{}.{}", node.name, node.class));
            current = node.parent;
        }
        parts.reverse();
        Ok(format!("\\{}", parts.join("\\")))
    }

    fn is_calc_relevant(&mut self, object: ObjectHandle) -> CampaignResult<bool> {
        let node = self.node(object)?;
        Ok(node
            .attributes
            .get("calc_relevant")
            .and_then(Value::as_int)
            .map(|v| v != 0)
            .unwrap_or(false))
    }

    fn create(&mut self, parent: ObjectHandle, class: &str, name: &str) -> CampaignResult<ObjectHandle> {
        self.node(parent)?;
        let object = self.add(Some(parent), class, name);
        if class == "ComTasks" {
            let settings = self.add(Some(object), "SetParalman", "Parallel Computing");
            self.set(object, "parallelSetting", Value::Object(settings));
        }
        Ok(object)
    }

    fn copy_into(&mut self, parent: ObjectHandle, source: ObjectHandle) -> CampaignResult<ObjectHandle> {
        self.node(parent)?;
        self.node(source)?;
        let idx = self.copy_subtree(parent.0 as usize, source.0 as usize);
        Ok(ObjectHandle(idx as u64))
    }

    fn delete(&mut self, object: ObjectHandle) -> CampaignResult<()> {
        let idx = object.0 as usize;
        self.node(object)?;
        let mut stack = vec![idx];
        while let Some(i) = stack.pop() {
            self.nodes[i].deleted = true;
            stack.extend(self.nodes[i].children.iter().copied());
        }
        if let Some(parent) = self.nodes[idx].parent {
            self.nodes[parent].children.retain(|&c| c != idx);
        }
        Ok(())
    }

    fn activate(&mut self, object: ObjectHandle) -> CampaignResult<()> {
        let class = {
            let node = self.node_mut(object)?;
            node.active = true;
            node.class.clone()
        };
        match class.as_str() {
            "IntCase" => {
                if let Some(previous) = self.active_study_case.replace(object.0 as usize) {
                    if previous != object.0 as usize {
                        self.nodes[previous].active = false;
                    }
                }
            }
            "IntPrj" => self.active_project = Some(object.0 as usize),
            _ => {}
        }
        Ok(())
    }

    fn deactivate(&mut self, object: ObjectHandle) -> CampaignResult<()> {
        self.node_mut(object)?.active = false;
        let idx = Some(object.0 as usize);
        if self.active_study_case == idx {
            self.active_study_case = None;
        }
        if self.active_project == idx {
            self.active_project = None;
        }
        Ok(())
    }

    fn get_attribute(&mut self, object: ObjectHandle, name: &str) -> CampaignResult<Value> {
        Ok(self
            .node(object)?
            .attributes
            .get(name)
            .cloned()
            .unwrap_or(Value::None))
    }

    fn set_attribute(&mut self, object: ObjectHandle, name: &str, value: Value) -> CampaignResult<()> {
        let node = self.node_mut(object)?;
        node.attributes.insert(name.to_string(), value.clone());
        if node.class == "IntPrjfolder" && name == "iopt_typ" {
            if let Some(folder) = value.as_text().and_then(ProjectFolder::from_code) {
                self.set_folder(folder, object);
            }
        }
        self.writes.push(AttributeWrite {
            object,
            attribute: name.to_string(),
            value,
        });
        Ok(())
    }

    fn execute(&mut self, object: ObjectHandle, method: &str, args: &[Value]) -> CampaignResult<Value> {
        let class = self.node(object)?.class.clone();
        self.commands.push(CommandRecord {
            object,
            class: class.clone(),
            method: method.to_string(),
            args: args.to_vec(),
        });

        let idx = object.0 as usize;
        match (class.as_str(), method) {
            ("ElmRes", "AddVariable") => {
                if let [Value::Object(target), Value::Text(variable)] = args {
                    self.node(*target)?;
                    self.result_variables
                        .entry(idx)
                        .or_default()
                        .push((*target, variable.clone()));
                }
                Ok(Value::Int(0))
            }
            ("ComTasks", "AppendStudyCase") | ("ComTasks", "AppendCommand") => {
                self.task_list.entry(idx).or_default().extend(args.iter().cloned());
                Ok(Value::Int(0))
            }
            ("ComTasks", "Execute") => Ok(Value::Int(self.batch_exit_code)),
            ("ComRes", "Execute") => {
                self.export_csv(object)?;
                Ok(Value::Int(0))
            }
            ("IntCase", "SetStudyTime") => {
                if let Some(time) = args.first() {
                    self.node_mut(object)?
                        .attributes
                        .insert("iStudyTime".to_string(), time.clone());
                }
                Ok(Value::Int(0))
            }
            _ => Ok(Value::Int(0)),
        }
    }

    fn from_study_case(&mut self, class: &str) -> CampaignResult<Option<ObjectHandle>> {
        let Some(case) = self.active_study_case else {
            return Ok(None);
        };
        let existing = self.nodes[case]
            .children
            .iter()
            .copied()
            .find(|&c| !self.nodes[c].deleted && self.nodes[c].class == class);
        let idx = match existing {
            Some(i) => i,
            None => {
                let name = match class {
                    "ElmRes" => "All calculations",
                    "IntEvt" => "Simulation Events/Fault",
                    _ => class,
                }
                .to_string();
                self.add(Some(ObjectHandle(case as u64)), class, &name).0 as usize
            }
        };
        Ok(Some(ObjectHandle(idx as u64)))
    }

    fn create_version(&mut self, project: ObjectHandle, name: &str) -> CampaignResult<()> {
        self.node(project)?;
        self.versions.push(name.to_string());
        Ok(())
    }

    fn write_changes(&mut self) -> CampaignResult<()> {
        Ok(())
    }

    fn set_echo(&mut self, on: bool) -> CampaignResult<()> {
        self.echo = on;
        Ok(())
    }
}

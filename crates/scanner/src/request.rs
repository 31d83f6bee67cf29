//! 스캔 요청 파싱
//!
//! 요청 경로(`module@version[/suffix]`)와 쿼리 문자열을 타입이 있는 요청으로
//! 변환합니다. 요청 타입마다 쿼리 키를 직접 읽고 쓰는 코덱을 둡니다.
//!
//! | 타입 | 쿼리 키 |
//! |------|---------|
//! | [`ScanTarget`] | `importedby`, `mode`, `insecure` |
//! | [`AnalysisRequest`] | `binary`, `args`, `insecure`, `jobid`, `nodeps` |
//! | [`EnqueueParams`] | `binary`, `user`, `min`, `max`, `args`, `file`, `mode` |
//!
//! 알 수 없는 키는 무시하고, 숫자/불리언 형식이 틀리면 검증 에러입니다.

use std::fmt;
use std::path::Component;

use url::form_urlencoded;

use modscan_core::types::{ModuleVersion, ScanMode};

use crate::error::ScanError;

/// 파싱된 쿼리 문자열
#[derive(Debug, Clone, Default)]
struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self {
            pairs: form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    /// 같은 키가 여러 번 나오면 마지막 값을 사용합니다.
    fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn string(&self, key: &str) -> String {
        self.get(key).unwrap_or_default().to_owned()
    }

    fn u64(&self, key: &str) -> Result<Option<u64>, ScanError> {
        match self.get(key) {
            None | Some("") => Ok(None),
            Some(raw) => raw.parse::<u64>().map(Some).map_err(|_| {
                ScanError::InvalidRequest(format!("{key}: '{raw}' is not a non-negative integer"))
            }),
        }
    }

    fn bool(&self, key: &str) -> Result<bool, ScanError> {
        match self.get(key) {
            None => Ok(false),
            Some(raw) => parse_bool(raw)
                .ok_or_else(|| ScanError::InvalidRequest(format!("{key}: '{raw}' is not a bool"))),
        }
    }

    fn mode(&self, key: &str) -> Result<ScanMode, ScanError> {
        match self.get(key) {
            None | Some("") => Ok(ScanMode::default()),
            Some(raw) => ScanMode::from_str_loose(raw)
                .ok_or_else(|| ScanError::InvalidRequest(format!("{key}: unknown mode '{raw}'"))),
        }
    }

    fn args(&self, key: &str) -> Vec<String> {
        split_args(self.get(key).unwrap_or_default())
    }
}

/// 빈 값은 `true`로 취급합니다 (`?insecure`).
fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "" | "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// 공백으로 구분된 인자 목록
pub fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_owned).collect()
}

/// `module@version[/suffix]` 경로 파싱 결과
struct TargetPath {
    module: String,
    version: String,
    suffix: String,
}

fn parse_target_path(path: &str) -> Result<TargetPath, ScanError> {
    let path = path.trim_start_matches('/');
    let (module, rest) = path.split_once('@').ok_or_else(|| {
        ScanError::InvalidRequest(format!("'{path}' is missing '@version'"))
    })?;
    let (version, suffix) = match rest.split_once('/') {
        Some((version, suffix)) => (version, suffix),
        None => (rest, ""),
    };

    validate_module_path(module)?;
    if version.is_empty() {
        return Err(ScanError::InvalidRequest(format!(
            "'{path}' has an empty version"
        )));
    }
    validate_suffix(suffix)?;

    Ok(TargetPath {
        module: module.to_owned(),
        version: version.to_owned(),
        suffix: suffix.to_owned(),
    })
}

/// 접미어는 모듈 디렉터리 안의 상대 패키지 경로여야 합니다.
fn validate_suffix(suffix: &str) -> Result<(), ScanError> {
    if suffix.is_empty() {
        return Ok(());
    }
    let bad = suffix
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == ".." || seg.contains('\\'));
    if bad {
        return Err(ScanError::InvalidRequest(format!(
            "invalid package suffix '{suffix}'"
        )));
    }
    Ok(())
}

fn validate_module_path(module: &str) -> Result<(), ScanError> {
    if module.is_empty() {
        return Err(ScanError::InvalidRequest("empty module path".to_owned()));
    }
    if module.chars().any(char::is_whitespace) {
        return Err(ScanError::InvalidRequest(format!(
            "module path '{module}' contains whitespace"
        )));
    }
    if std::path::Path::new(module)
        .components()
        .any(|c| c == Component::ParentDir)
    {
        return Err(ScanError::InvalidRequest(format!(
            "module path '{module}' contains '..'"
        )));
    }
    Ok(())
}

/// 스캔 대상
///
/// 요청에서 한 번 파싱된 뒤에는 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    module: String,
    version: String,
    suffix: String,
    imported_by: u64,
    mode: ScanMode,
    insecure: bool,
}

impl ScanTarget {
    /// 요청 경로와 쿼리 문자열을 파싱합니다.
    pub fn parse(path: &str, query: &str) -> Result<Self, ScanError> {
        let target = parse_target_path(path)?;
        let (imported_by, mode, insecure) = Self::from_query(query)?;
        Ok(Self {
            module: target.module,
            version: target.version,
            suffix: target.suffix,
            imported_by,
            mode,
            insecure,
        })
    }

    /// 쿼리 문자열에서 `(importedby, mode, insecure)`를 읽습니다.
    pub fn from_query(query: &str) -> Result<(u64, ScanMode, bool), ScanError> {
        let q = Query::parse(query);
        Ok((
            q.u64("importedby")?.unwrap_or(0),
            q.mode("mode")?,
            q.bool("insecure")?,
        ))
    }

    /// 쿼리 문자열로 직렬화합니다. 기본값인 키는 생략합니다.
    pub fn to_query(&self) -> String {
        let mut s = form_urlencoded::Serializer::new(String::new());
        if self.imported_by > 0 {
            s.append_pair("importedby", &self.imported_by.to_string());
        }
        if self.mode != ScanMode::default() {
            s.append_pair("mode", self.mode.as_str());
        }
        if self.insecure {
            s.append_pair("insecure", "true");
        }
        s.finish()
    }

    /// 코드에서 직접 대상을 구성합니다.
    pub fn new(module: impl Into<String>, version: impl Into<String>, mode: ScanMode) -> Result<Self, ScanError> {
        let module = module.into();
        let version = version.into();
        validate_module_path(&module)?;
        if version.is_empty() {
            return Err(ScanError::InvalidRequest("empty version".to_owned()));
        }
        Ok(Self {
            module,
            version,
            suffix: String::new(),
            imported_by: 0,
            mode,
            insecure: false,
        })
    }

    /// import 수를 지정합니다.
    pub fn with_imported_by(mut self, imported_by: u64) -> Self {
        self.imported_by = imported_by;
        self
    }

    /// 모듈 경로
    pub fn module(&self) -> &str {
        &self.module
    }

    /// 버전
    pub fn version(&self) -> &str {
        &self.version
    }

    /// 버전 뒤의 하위 경로 (없으면 빈 문자열)
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// 이 모듈을 import하는 모듈 수
    pub fn imported_by(&self) -> u64 {
        self.imported_by
    }

    /// 스캔 모드
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// 보안 완화 모드 (샌드박스 없이 실행)
    pub fn insecure(&self) -> bool {
        self.insecure
    }

    /// 모듈 + 버전
    pub fn module_version(&self) -> ModuleVersion {
        ModuleVersion::new(&self.module, &self.version)
    }

    /// 요청 경로 (`module@version[/suffix]`)
    pub fn path(&self) -> String {
        if self.suffix.is_empty() {
            format!("{}@{}", self.module, self.version)
        } else {
            format!("{}@{}/{}", self.module, self.version, self.suffix)
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path(), self.mode)
    }
}

/// 분석 바이너리 실행 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    /// 모듈 경로
    pub module: String,
    /// 버전
    pub version: String,
    /// 분석 바이너리 이름 (오브젝트 스토어 `analysis-binaries/` 아래 basename)
    pub binary: String,
    /// 분석 바이너리 인자
    pub args: Vec<String>,
    /// 샌드박스 없이 실행
    pub insecure: bool,
    /// 소속 Job ID
    pub job_id: Option<String>,
    /// 의존성 다운로드 생략
    pub no_deps: bool,
}

impl AnalysisRequest {
    /// 요청 경로와 쿼리 문자열을 파싱합니다.
    pub fn parse(path: &str, query: &str) -> Result<Self, ScanError> {
        let target = parse_target_path(path)?;
        if !target.suffix.is_empty() {
            return Err(ScanError::InvalidRequest(format!(
                "analysis runs on a whole module, got package suffix '{}'",
                target.suffix
            )));
        }
        let mut req = Self::from_query(query)?;
        req.module = target.module;
        req.version = target.version;
        Ok(req)
    }

    /// 쿼리 부분만 파싱합니다. 모듈/버전은 비어 있습니다.
    pub fn from_query(query: &str) -> Result<Self, ScanError> {
        let q = Query::parse(query);
        let binary = q.string("binary");
        validate_binary_name(&binary)?;
        let job_id = q.get("jobid").filter(|s| !s.is_empty()).map(str::to_owned);
        Ok(Self {
            module: String::new(),
            version: String::new(),
            binary,
            args: q.args("args"),
            insecure: q.bool("insecure")?,
            job_id,
            no_deps: q.bool("nodeps")?,
        })
    }

    /// 쿼리 문자열로 직렬화합니다.
    pub fn to_query(&self) -> String {
        let mut s = form_urlencoded::Serializer::new(String::new());
        s.append_pair("binary", &self.binary);
        if !self.args.is_empty() {
            s.append_pair("args", &self.args.join(" "));
        }
        if self.insecure {
            s.append_pair("insecure", "true");
        }
        if let Some(job_id) = &self.job_id {
            s.append_pair("jobid", job_id);
        }
        if self.no_deps {
            s.append_pair("nodeps", "true");
        }
        s.finish()
    }

    /// 요청 경로 (`module@version`)
    pub fn path(&self) -> String {
        format!("{}@{}", self.module, self.version)
    }
}

fn validate_binary_name(binary: &str) -> Result<(), ScanError> {
    if binary.is_empty() {
        return Err(ScanError::InvalidRequest("missing binary".to_owned()));
    }
    if binary.contains('/') || binary.contains('\\') || binary == "." || binary == ".." {
        return Err(ScanError::InvalidRequest(format!(
            "binary '{binary}' must be a base name"
        )));
    }
    Ok(())
}

/// 대량 작업 추가 파라미터
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnqueueParams {
    /// 분석 바이너리 이름 (vulncheck 작업이면 비어있음)
    pub binary: String,
    /// 요청 사용자
    pub user: String,
    /// 최소 import 수 (포함)
    pub min: u64,
    /// 최대 import 수 (포함, 없으면 무제한)
    pub max: Option<u64>,
    /// 분석 바이너리 인자
    pub args: Vec<String>,
    /// 모듈 목록 파일 (오브젝트 스토어 경로). 없으면 기본 코퍼스
    pub file: Option<String>,
    /// 스캔 모드
    pub mode: ScanMode,
}

impl EnqueueParams {
    /// 쿼리 문자열을 파싱합니다.
    pub fn from_query(query: &str) -> Result<Self, ScanError> {
        let q = Query::parse(query);
        let params = Self {
            binary: q.string("binary"),
            user: q.string("user"),
            min: q.u64("min")?.unwrap_or(0),
            max: q.u64("max")?,
            args: q.args("args"),
            file: q.get("file").filter(|s| !s.is_empty()).map(str::to_owned),
            mode: q.mode("mode")?,
        };
        if let Some(max) = params.max
            && max < params.min
        {
            return Err(ScanError::InvalidRequest(format!(
                "max ({max}) is less than min ({})",
                params.min
            )));
        }
        Ok(params)
    }

    /// 분석 작업용 검증: 바이너리가 필요합니다.
    pub fn validate_for_analysis(&self) -> Result<(), ScanError> {
        validate_binary_name(&self.binary)
    }

    /// 쿼리 문자열로 직렬화합니다.
    pub fn to_query(&self) -> String {
        let mut s = form_urlencoded::Serializer::new(String::new());
        if !self.binary.is_empty() {
            s.append_pair("binary", &self.binary);
        }
        if !self.user.is_empty() {
            s.append_pair("user", &self.user);
        }
        if self.min > 0 {
            s.append_pair("min", &self.min.to_string());
        }
        if let Some(max) = self.max {
            s.append_pair("max", &max.to_string());
        }
        if !self.args.is_empty() {
            s.append_pair("args", &self.args.join(" "));
        }
        if let Some(file) = &self.file {
            s.append_pair("file", file);
        }
        if self.mode != ScanMode::default() {
            s.append_pair("mode", self.mode.as_str());
        }
        s.finish()
    }
}

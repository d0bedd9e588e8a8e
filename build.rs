use minify_html::{Cfg, minify};

fn main()
{
  let mut cfg = Cfg::new();
  cfg.minify_css = true;
  cfg.minify_js = true;
  cfg.preserve_brace_template_syntax = true;
  cfg.preserve_chevron_percent_template_syntax = true;
  std::fs::create_dir_all("templates").unwrap();
  for entry in std::fs::read_dir("templates/src").unwrap()
  {
    let path = entry.unwrap().path();
    if path.extension().map_or(false, |ext| ext == "html")
    {
      std::fs::write(
        std::path::Path::new("templates").join(path.file_name().unwrap()),
        minify(&std::fs::read(&path).unwrap(), &cfg)).unwrap();
    }
  }
  println!("cargo:rerun-if-changed=templates/src");
}
